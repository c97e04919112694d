pub mod context;
pub mod login;
pub mod resource;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use sipreciconts_client::{Pipeline, SessionManager};
use sipreciconts_console::{Console, ControllerOptions, Notification, NotificationLevel, Notifier};
use sipreciconts_kv::{origin_namespace, KVStore, Namespaced, RedbStore};
use tracing::debug;

use crate::config::{store_path, CliConfig, Context};

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Output {
    Table,
    Json,
}

/// Prints controller notifications to stderr, keeping stdout for data.
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, n: Notification) {
        eprintln!("{}", render_notification(&n));
    }
}

fn render_notification(n: &Notification) -> String {
    let tag = match n.level {
        NotificationLevel::Success => "ok",
        NotificationLevel::Info => "info",
        NotificationLevel::Warning => "warning",
        NotificationLevel::Error => "error",
    };
    format!("[{tag}] {}", n.message)
}

/// Open the current context's session and build the console over it.
///
/// Prints the session-expired notice if the previous command ended the
/// session.
pub fn connect(config_path: &Path) -> Result<(Context, Console)> {
    let config = CliConfig::load(config_path)?;
    let ctx = config.require_current()?.clone();
    if ctx.server.is_empty() {
        anyhow::bail!(
            "No server URL set for context \"{name}\". \
             Run `sipreciconts context set {name} --server <url>`.",
            name = ctx.name
        );
    }

    let path = store_path(config_path, &ctx.name);
    debug!(context = %ctx.name, store = %path.display(), "opening credential store");
    let redb: Arc<dyn KVStore> = Arc::new(RedbStore::open(&path)?);
    let store: Arc<dyn KVStore> = Arc::new(Namespaced::new(redb, &origin_namespace(&ctx.server)));

    let session = Arc::new(SessionManager::new(store, ctx.client_config())?);
    let pipeline = Arc::new(Pipeline::new(session));
    pipeline.set_company_override(ctx.company_id.clone());

    let console = Console::new(pipeline, Arc::new(StderrNotifier), ControllerOptions::default());
    if console.guard().take_expired_notice() {
        eprintln!("Your session has expired. Run `sipreciconts login` to sign in again.");
    }
    Ok((ctx, console))
}
