use std::sync::Arc;

use sipreciconts_client::{AuthClient, Pipeline, ResourceService};
use sipreciconts_core::{Company, Customer, Resource, Supply, SupplyPrice, Tax, User};

use crate::controller::{ControllerOptions, ListController};
use crate::guard::SessionGuard;
use crate::notify::Notifier;

/// List controller backed by the REST service for `T`.
pub type EntityController<T> = ListController<T, ResourceService<T>>;

/// The application shell: one controller per entity over a shared
/// pipeline, torn down together when the session expires and reactivated
/// when the user signs back in.
pub struct Console {
    pipeline: Arc<Pipeline>,
    auth: AuthClient,
    guard: SessionGuard,
    companies: EntityController<Company>,
    customers: EntityController<Customer>,
    supplies: EntityController<Supply>,
    taxes: EntityController<Tax>,
    users: EntityController<User>,
    supply_prices: EntityController<SupplyPrice>,
}

impl Console {
    pub fn new(
        pipeline: Arc<Pipeline>,
        notifier: Arc<dyn Notifier>,
        options: ControllerOptions,
    ) -> Self {
        let guard = SessionGuard::new(pipeline.session().clone());
        Self {
            auth: AuthClient::new(pipeline.clone()),
            companies: controller(&pipeline, &notifier, &options, &guard),
            customers: controller(&pipeline, &notifier, &options, &guard),
            supplies: controller(&pipeline, &notifier, &options, &guard),
            taxes: controller(&pipeline, &notifier, &options, &guard),
            users: controller(&pipeline, &notifier, &options, &guard),
            supply_prices: controller(&pipeline, &notifier, &options, &guard),
            guard,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    pub fn companies(&self) -> &EntityController<Company> {
        &self.companies
    }

    pub fn customers(&self) -> &EntityController<Customer> {
        &self.customers
    }

    pub fn supplies(&self) -> &EntityController<Supply> {
        &self.supplies
    }

    pub fn taxes(&self) -> &EntityController<Tax> {
        &self.taxes
    }

    pub fn users(&self) -> &EntityController<User> {
        &self.users
    }

    pub fn supply_prices(&self) -> &EntityController<SupplyPrice> {
        &self.supply_prices
    }
}

/// Built controllers stop writing state once the session expires and
/// accept triggers again after the next sign-in.
fn controller<T: Resource>(
    pipeline: &Arc<Pipeline>,
    notifier: &Arc<dyn Notifier>,
    options: &ControllerOptions,
    guard: &SessionGuard,
) -> EntityController<T> {
    let service = Arc::new(ResourceService::new(pipeline.clone()));
    let controller = ListController::new(service, notifier.clone(), options.clone());
    let on_expiry = controller.clone();
    guard.on_expired(move || on_expiry.unmount());
    let on_sign_in = controller.clone();
    guard.on_signed_in(move || on_sign_in.activate());
    controller
}
