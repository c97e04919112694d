//! CLI contexts.
//!
//! Reads/writes `~/.sipreciconts/config.toml`. Each context also owns a
//! credential store next to the config file, `<name>.redb`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sipreciconts_client::ClientConfig;

/// One backend the CLI can talk to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Context name (e.g. "prod").
    pub name: String,

    /// API root (e.g. "https://erp.example.com/api").
    pub server: String,

    /// Company sent as `X-Company-ID` instead of the signed-in user's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,

    /// Client tuning: timeouts, token buffer, retry policy. `base_url`
    /// is always taken from `server`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,
}

impl Context {
    pub fn new(name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            company_id: None,
            client: None,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.server.trim_end_matches('/').to_string(),
            ..self.client.clone().unwrap_or_default()
        }
    }
}

/// The CLI configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Name of the currently active context.
    #[serde(rename = "current-context", default)]
    pub current_context: String,

    #[serde(default)]
    pub contexts: Vec<Context>,
}

impl CliConfig {
    /// Default config file path: ~/.sipreciconts/config.toml.
    pub fn default_path() -> PathBuf {
        home_dir().join("config.toml")
    }

    /// Load config from disk, or return default if the file doesn't exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: CliConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn current(&self) -> Option<&Context> {
        self.get(&self.current_context)
    }

    /// The current context, or an error telling the user how to pick one.
    pub fn require_current(&self) -> anyhow::Result<&Context> {
        self.current().ok_or_else(|| {
            anyhow::anyhow!("No current context. Run `sipreciconts use context <name>`.")
        })
    }

    pub fn get(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Context> {
        self.contexts.iter_mut().find(|c| c.name == name)
    }

    /// Add or replace a context.
    pub fn upsert_context(&mut self, ctx: Context) {
        if let Some(existing) = self.get_mut(&ctx.name) {
            *existing = ctx;
        } else {
            self.contexts.push(ctx);
        }
    }

    /// Remove a context by name. Returns true if it was found.
    pub fn remove_context(&mut self, name: &str) -> bool {
        let len = self.contexts.len();
        self.contexts.retain(|c| c.name != name);
        if self.current_context == name {
            self.current_context = String::new();
        }
        self.contexts.len() < len
    }
}

/// Credential store for `context`, kept beside the config file.
pub fn store_path(config_path: &Path, context: &str) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(home_dir)
        .join(format!("{context}.redb"))
}

fn home_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".sipreciconts")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(&dir.path().join("config.toml")).unwrap();
        assert!(config.current_context.is_empty());
        assert!(config.contexts.is_empty());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CliConfig::default();
        let mut prod = Context::new("prod", "https://erp.example.com/api/");
        prod.company_id = Some("7".into());
        config.upsert_context(prod);
        config.current_context = "prod".into();
        config.save(&path).unwrap();

        let back = CliConfig::load(&path).unwrap();
        let current = back.current().unwrap();
        assert_eq!(current.company_id.as_deref(), Some("7"));
        assert_eq!(current.client_config().base_url, "https://erp.example.com/api");
    }

    #[test]
    fn partial_client_table_keeps_defaults() {
        let config: CliConfig = toml::from_str(
            r#"
current-context = "stage"

[[contexts]]
name = "stage"
server = "http://stage.local/api"

[contexts.client]
request_timeout_secs = 5
base_url = "http://ignored"

[contexts.client.retry]
max_attempts = 1
"#,
        )
        .unwrap();

        let client = config.current().unwrap().client_config();
        assert_eq!(client.base_url, "http://stage.local/api");
        assert_eq!(client.request_timeout_secs, 5);
        assert_eq!(client.retry.max_attempts, 1);
        assert_eq!(client.token_buffer_secs, ClientConfig::default().token_buffer_secs);
    }

    #[test]
    fn upsert_and_remove() {
        let mut config = CliConfig::default();
        config.upsert_context(Context::new("a", "http://a"));
        config.upsert_context(Context::new("b", "http://b"));
        config.upsert_context(Context::new("a", "http://a2"));
        assert_eq!(config.contexts.len(), 2);
        assert_eq!(config.get("a").unwrap().server, "http://a2");

        config.current_context = "a".into();
        assert!(config.remove_context("a"));
        assert!(config.current_context.is_empty());
        assert!(!config.remove_context("a"));
        assert!(config.require_current().is_err());
    }

    #[test]
    fn store_lives_next_to_config() {
        let path = store_path(Path::new("/tmp/cli/config.toml"), "prod");
        assert_eq!(path, PathBuf::from("/tmp/cli/prod.redb"));
    }
}
