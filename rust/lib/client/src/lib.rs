//! SiPreciConts HTTP client.
//!
//! [`SessionManager`] owns the persisted credentials and the single-flight
//! token refresh. [`Pipeline`] wraps every outbound call: it attaches
//! credentials, recovers once from an expired access token and retries
//! transient failures. [`AuthClient`] and [`ResourceService`] are the typed
//! endpoints built on top of it.
//!
//! # Usage
//!
//! ```ignore
//! use sipreciconts_client::{AuthClient, ClientConfig, Pipeline, ResourceService, SessionManager};
//! use sipreciconts_core::{Customer, ListQuery};
//!
//! let config = ClientConfig::new("https://erp.example.com/api");
//! let session = Arc::new(SessionManager::new(store, config)?);
//! let pipeline = Arc::new(Pipeline::new(session));
//! AuthClient::new(pipeline.clone()).login("alice", "secret123").await?;
//! let page = ResourceService::<Customer>::new(pipeline).list(&ListQuery::default()).await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod resource;
pub mod session;
pub mod token;

#[cfg(test)]
mod mock;

pub use auth::AuthClient;
pub use config::{Backoff, ClientConfig, RetryPolicy};
pub use events::{SessionEvent, SessionEvents, SubscriptionId};
pub use pipeline::{Download, Envelope, Payload, Pipeline};
pub use resource::{ResourceApi, ResourceService};
pub use session::{LoginResponse, RefreshOutcome, SessionManager};
