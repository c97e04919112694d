use std::sync::{Arc, Mutex};

use sipreciconts_client::{SessionEvent, SessionManager, SubscriptionId};
use tokio::sync::watch;
use tracing::info;

/// Which view the shell should be showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthView {
    SignedOut,
    SignedIn,
    /// Login view with the "your session expired" indicator.
    Expired,
}

type Hook = Box<dyn Fn() + Send + Sync>;

fn run(hooks: &Mutex<Vec<Hook>>) {
    let hooks = hooks.lock().unwrap_or_else(|e| e.into_inner());
    for hook in hooks.iter() {
        hook();
    }
}

fn push(hooks: &Mutex<Vec<Hook>>, hook: Hook) {
    hooks.lock().unwrap_or_else(|e| e.into_inner()).push(hook);
}

struct Shared {
    view: watch::Sender<AuthView>,
    teardowns: Mutex<Vec<Hook>>,
    restores: Mutex<Vec<Hook>>,
}

impl Shared {
    fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::SignedIn => {
                self.view.send_replace(AuthView::SignedIn);
                run(&self.restores);
            }
            SessionEvent::SignedOut => {
                self.view.send_replace(AuthView::SignedOut);
            }
            SessionEvent::Expired => {
                info!("session expired, tearing down views");
                self.view.send_replace(AuthView::Expired);
                run(&self.teardowns);
            }
        }
    }
}

/// Listens for session events for as long as it lives.
pub struct SessionGuard {
    session: Arc<SessionManager>,
    shared: Arc<Shared>,
    subscription: SubscriptionId,
}

impl SessionGuard {
    pub fn new(session: Arc<SessionManager>) -> Self {
        let initial = match session.has_session() {
            Ok(true) => AuthView::SignedIn,
            _ => AuthView::SignedOut,
        };
        let (view, _) = watch::channel(initial);
        let shared = Arc::new(Shared {
            view,
            teardowns: Mutex::new(Vec::new()),
            restores: Mutex::new(Vec::new()),
        });
        let listener = shared.clone();
        let subscription = session.events().subscribe(move |event| listener.on_event(event));
        Self {
            session,
            shared,
            subscription,
        }
    }

    pub fn auth_view(&self) -> AuthView {
        *self.shared.view.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<AuthView> {
        self.shared.view.subscribe()
    }

    /// Run `teardown` every time the session expires.
    pub fn on_expired<F>(&self, teardown: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        push(&self.shared.teardowns, Box::new(teardown));
    }

    /// Run `restore` every time a session is established.
    pub fn on_signed_in<F>(&self, restore: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        push(&self.shared.restores, Box::new(restore));
    }

    /// For the login view: whether to show the expiry notice. Clears it.
    pub fn take_expired_notice(&self) -> bool {
        self.session.take_expired_notice()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.events().unsubscribe(self.subscription);
    }
}
