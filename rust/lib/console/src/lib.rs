//! Application shell over the SiPreciConts client.
//!
//! One generic [`ListController`] per entity owns the list-query state
//! machine (search, pagination, sort, last-write-wins loads) and mediates
//! CRUD, import and export. [`SessionGuard`] turns session expiry into an
//! auth view change and tears the controllers down.

pub mod console;
pub mod controller;
pub mod guard;
pub mod notify;

pub use console::{Console, EntityController};
pub use controller::{ControllerOptions, ListController, ListState, ListStatus};
pub use guard::{AuthView, SessionGuard};
pub use notify::{Notification, NotificationLevel, Notifier, TracingNotifier};
