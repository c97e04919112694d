//! `sipreciconts`: command-line client for the SiPreciConts backend.
//!
//! Manages contexts, signs in and runs list/CRUD/import/export for every
//! entity. The session persists between invocations.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sipreciconts_core::{ExportFormat, ListQuery, SortOrder};

use commands::resource::{Action, Entity};
use commands::Output;

/// SiPreciConts CLI tool.
#[derive(Parser, Debug)]
#[command(name = "sipreciconts", about = "SiPreciConts CLI client")]
struct Cli {
    /// Path to the config file (default: ~/.sipreciconts/config.toml).
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Output format.
    #[arg(long = "output", short = 'o', global = true, value_enum, default_value = "table")]
    output: Output,

    /// Debug logging on stderr.
    #[arg(long = "verbose", short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage contexts (one per backend).
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },

    /// Switch the current context.
    #[command(name = "use")]
    Use {
        #[command(subcommand)]
        what: UseWhat,
    },

    /// Sign in to the current context's server.
    Login {
        #[arg(long)]
        user: Option<String>,
        /// Password (not recommended, use the interactive prompt).
        #[arg(long)]
        password: Option<String>,
    },

    /// Sign out and clear the stored session.
    Logout,

    /// Show the signed-in user.
    Whoami,

    /// List one page of an entity.
    List {
        /// Entity (e.g. customers, taxes, prices).
        entity: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long = "page-size", default_value_t = 10)]
        page_size: u32,
        #[arg(long)]
        search: Option<String>,
        #[arg(long = "sort-by")]
        sort_by: Option<String>,
        /// Sort descending.
        #[arg(long)]
        desc: bool,
    },

    /// Get one record by id.
    Get { entity: String, id: String },

    /// Create a record.
    Create {
        entity: String,
        /// JSON body.
        #[arg(long = "json")]
        json_body: Option<String>,
        /// Read the JSON body from a file.
        #[arg(short = 'f', long = "file")]
        file: Option<String>,
    },

    /// Update a record.
    Update {
        entity: String,
        id: String,
        /// JSON body with the fields to change.
        #[arg(long = "json")]
        json_body: String,
    },

    /// Delete a record.
    Delete {
        entity: String,
        id: String,
        /// Skip confirmation.
        #[arg(long = "yes", short = 'y')]
        yes: bool,
    },

    /// Bulk import from a CSV or Excel file.
    Import { entity: String, file: PathBuf },

    /// Download every record as CSV or Excel.
    Export {
        entity: String,
        /// csv or xlsx.
        #[arg(long, default_value = "csv")]
        format: String,
        /// Target file (default: the name suggested by the server).
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show version.
    Version,
}

#[derive(Subcommand, Debug)]
enum ContextAction {
    /// Register a backend.
    Create {
        name: String,
        /// API root, e.g. https://erp.example.com/api.
        #[arg(long)]
        server: String,
        /// Company to act on instead of the signed-in user's.
        #[arg(long = "company-id")]
        company_id: Option<String>,
    },
    /// List all contexts.
    List,
    /// Set properties on a context.
    Set {
        name: String,
        #[arg(long)]
        server: Option<String>,
        /// Empty string clears the override.
        #[arg(long = "company-id")]
        company_id: Option<String>,
    },
    /// Delete a context and its stored session.
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
enum UseWhat {
    /// Switch to a context.
    Context { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(config::CliConfig::default_path);
    let output = cli.output;

    match cli.command {
        Commands::Context { action } => match action {
            ContextAction::Create {
                name,
                server,
                company_id,
            } => {
                commands::context::create(&name, &server, company_id.as_deref(), &config_path)?;
            }
            ContextAction::List => {
                commands::context::list(&config_path)?;
            }
            ContextAction::Set {
                name,
                server,
                company_id,
            } => {
                commands::context::set(
                    &name,
                    server.as_deref(),
                    company_id.as_deref(),
                    &config_path,
                )?;
            }
            ContextAction::Delete { name } => {
                commands::context::delete(&name, &config_path)?;
            }
        },

        Commands::Use { what } => match what {
            UseWhat::Context { name } => {
                commands::context::use_context(&name, &config_path)?;
            }
        },

        Commands::Login { user, password } => {
            let user = match user {
                Some(u) => u,
                None => {
                    eprint!("Login: ");
                    let mut s = String::new();
                    std::io::stdin().read_line(&mut s)?;
                    s.trim().to_string()
                }
            };
            let password = match password {
                Some(p) => p,
                None => rpassword::prompt_password("Password: ")?,
            };
            if user.is_empty() || password.is_empty() {
                anyhow::bail!("Login and password cannot be empty.");
            }
            commands::login::login(&user, &password, &config_path).await?;
        }

        Commands::Logout => {
            commands::login::logout(&config_path).await?;
        }

        Commands::Whoami => {
            commands::login::whoami(output, &config_path).await?;
        }

        Commands::List {
            entity,
            page,
            page_size,
            search,
            sort_by,
            desc,
        } => {
            let mut query = ListQuery::default()
                .with_page_size(page_size)
                .with_search(search.unwrap_or_default())
                .with_page(page);
            if let Some(field) = sort_by {
                let order = if desc { SortOrder::Desc } else { SortOrder::Asc };
                query = query.with_sort(field, order);
            }
            commands::resource::run(entity.parse()?, Action::List(query), output, &config_path)
                .await?;
        }

        Commands::Get { entity, id } => {
            commands::resource::run(entity.parse()?, Action::Get(id), output, &config_path).await?;
        }

        Commands::Create {
            entity,
            json_body,
            file,
        } => {
            let text = if let Some(path) = file {
                std::fs::read_to_string(&path)?
            } else if let Some(json) = json_body {
                json
            } else {
                anyhow::bail!("Provide --json or -f <file>.");
            };
            let body = commands::resource::parse_body(&text)?;
            commands::resource::run(entity.parse()?, Action::Create(body), output, &config_path)
                .await?;
        }

        Commands::Update {
            entity,
            id,
            json_body,
        } => {
            let body = commands::resource::parse_body(&json_body)?;
            commands::resource::run(entity.parse()?, Action::Update(id, body), output, &config_path)
                .await?;
        }

        Commands::Delete { entity, id, yes } => {
            let entity: Entity = entity.parse()?;
            if !yes {
                eprint!("Delete {:?} {}? [y/N]: ", entity, id);
                let mut s = String::new();
                std::io::stdin().read_line(&mut s)?;
                if !s.trim().eq_ignore_ascii_case("y") {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            commands::resource::run(entity, Action::Delete(id), output, &config_path).await?;
        }

        Commands::Import { entity, file } => {
            commands::resource::run(entity.parse()?, Action::Import(file), output, &config_path)
                .await?;
        }

        Commands::Export {
            entity,
            format,
            out,
        } => {
            let format: ExportFormat = format.parse().map_err(anyhow::Error::msg)?;
            commands::resource::run(
                entity.parse()?,
                Action::Export { format, out },
                output,
                &config_path,
            )
            .await?;
        }

        Commands::Version => {
            println!("sipreciconts cli v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
