//! Context management commands.

use std::path::Path;

use anyhow::Result;

use crate::config::{store_path, CliConfig, Context};

/// Register a new context. The first context becomes current.
pub fn create(
    name: &str,
    server: &str,
    company_id: Option<&str>,
    config_path: &Path,
) -> Result<()> {
    if server.trim().is_empty() {
        anyhow::bail!("Server URL cannot be empty.");
    }
    let mut config = CliConfig::load(config_path)?;
    if config.get(name).is_some() {
        anyhow::bail!(
            "Context \"{}\" already exists. Use `sipreciconts context set {}` to change it.",
            name,
            name
        );
    }

    let mut ctx = Context::new(name, server.trim_end_matches('/'));
    ctx.company_id = company_id.map(str::to_string);
    config.upsert_context(ctx);
    if config.current_context.is_empty() {
        config.current_context = name.to_string();
    }
    config.save(config_path)?;

    println!("Context \"{}\" created.", name);
    println!("  Server: {}", server);
    Ok(())
}

pub fn list(config_path: &Path) -> Result<()> {
    let config = CliConfig::load(config_path)?;

    if config.contexts.is_empty() {
        println!("No contexts configured.");
        println!("Run: sipreciconts context create <name> --server <url>");
        return Ok(());
    }

    println!("{:2} {:20} {:40} {:10}", "", "NAME", "SERVER", "COMPANY");
    for ctx in &config.contexts {
        let marker = if ctx.name == config.current_context { "*" } else { " " };
        let company = ctx.company_id.as_deref().unwrap_or("-");
        println!("{:2} {:20} {:40} {:10}", marker, ctx.name, ctx.server, company);
    }
    Ok(())
}

pub fn use_context(name: &str, config_path: &Path) -> Result<()> {
    let mut config = CliConfig::load(config_path)?;

    if config.get(name).is_none() {
        anyhow::bail!(
            "Context \"{}\" not found. Run `sipreciconts context list` to see available contexts.",
            name
        );
    }

    config.current_context = name.to_string();
    config.save(config_path)?;
    println!("Switched to context \"{}\".", name);
    Ok(())
}

/// Change the server or company of a context. An empty company id clears
/// the override.
pub fn set(
    name: &str,
    server: Option<&str>,
    company_id: Option<&str>,
    config_path: &Path,
) -> Result<()> {
    let mut config = CliConfig::load(config_path)?;

    let ctx = config
        .get_mut(name)
        .ok_or_else(|| anyhow::anyhow!("Context \"{}\" not found.", name))?;

    if let Some(s) = server {
        ctx.server = s.trim_end_matches('/').to_string();
    }
    if let Some(c) = company_id {
        ctx.company_id = (!c.is_empty()).then(|| c.to_string());
    }

    config.save(config_path)?;
    println!("Context \"{}\" updated.", name);
    Ok(())
}

/// Delete a context together with its stored credentials.
pub fn delete(name: &str, config_path: &Path) -> Result<()> {
    let mut config = CliConfig::load(config_path)?;

    if !config.remove_context(name) {
        anyhow::bail!("Context \"{}\" not found.", name);
    }
    config.save(config_path)?;

    let store = store_path(config_path, name);
    if store.exists() {
        std::fs::remove_file(&store)?;
    }
    println!("Context \"{}\" deleted.", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_context_becomes_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        create("prod", "https://erp.example.com/api/", None, &path).unwrap();
        create("stage", "http://stage.local/api", Some("4"), &path).unwrap();
        assert!(create("prod", "http://other", None, &path).is_err());

        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config.current_context, "prod");
        assert_eq!(config.get("prod").unwrap().server, "https://erp.example.com/api");
        assert_eq!(config.get("stage").unwrap().company_id.as_deref(), Some("4"));
    }

    #[test]
    fn set_use_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        create("prod", "http://a/api", Some("1"), &path).unwrap();
        create("stage", "http://b/api", None, &path).unwrap();

        set("prod", Some("http://c/api/"), Some(""), &path).unwrap();
        use_context("stage", &path).unwrap();
        assert!(use_context("missing", &path).is_err());

        let config = CliConfig::load(&path).unwrap();
        let prod = config.get("prod").unwrap();
        assert_eq!(prod.server, "http://c/api");
        assert_eq!(prod.company_id, None);
        assert_eq!(config.current_context, "stage");

        std::fs::write(store_path(&path, "stage"), b"").unwrap();
        delete("stage", &path).unwrap();
        assert!(!store_path(&path, "stage").exists());
        let config = CliConfig::load(&path).unwrap();
        assert!(config.current_context.is_empty());
        assert!(delete("stage", &path).is_err());
    }
}
