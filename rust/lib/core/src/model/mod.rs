//! Entity models served by the REST backend.
//!
//! Every entity tolerates unknown fields and missing optional ones, so a
//! backend that grows a column never breaks deserialization.

mod company;
mod customer;
mod supply;
mod supply_price;
mod tax;
mod user;

pub use company::Company;
pub use customer::Customer;
pub use supply::Supply;
pub use supply_price::SupplyPrice;
pub use tax::Tax;
pub use user::User;

use serde::{de::DeserializeOwned, Serialize};

/// A REST collection the client knows how to address.
///
/// `PATH` is the collection segment under the API root (`customers` →
/// `/customers/`, `/customers/{id}/`).
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const PATH: &'static str;
    /// Singular, human-facing name used in notifications.
    const NAME: &'static str;

    fn id(&self) -> String;
}

macro_rules! resource {
    ($ty:ty, $path:literal, $name:literal) => {
        impl Resource for $ty {
            const PATH: &'static str = $path;
            const NAME: &'static str = $name;

            fn id(&self) -> String {
                self.id.to_string()
            }
        }
    };
}

resource!(Company, "companies", "company");
resource!(Customer, "customers", "customer");
resource!(Supply, "supplies", "supply");
resource!(Tax, "taxes", "tax");
resource!(User, "users", "user");
resource!(SupplyPrice, "supplies-prices", "price-list item");
