//! Generic entity commands.
//!
//! `sipreciconts list customers`, `sipreciconts import taxes file.xlsx`, etc.
//! Every command goes through the entity's list controller, so
//! notifications and list reloads behave as they do in the console.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use sipreciconts_console::EntityController;
use sipreciconts_core::{ExportFormat, FileUpload, ImportReport, ListQuery, Progress, Resource};

use super::{connect, Output};

/// Entities served by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Companies,
    Customers,
    Supplies,
    Taxes,
    Users,
    SupplyPrices,
}

impl FromStr for Entity {
    type Err = anyhow::Error;

    /// Singular and plural names, case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "company" | "companies" => Ok(Entity::Companies),
            "customer" | "customers" => Ok(Entity::Customers),
            "supply" | "supplies" => Ok(Entity::Supplies),
            "tax" | "taxes" => Ok(Entity::Taxes),
            "user" | "users" => Ok(Entity::Users),
            "supply-price" | "supply-prices" | "supplies-prices" | "price" | "prices" => {
                Ok(Entity::SupplyPrices)
            }
            _ => Err(anyhow::anyhow!("Unknown entity: {}", s)),
        }
    }
}

/// What to do with an entity.
#[derive(Debug)]
pub enum Action {
    List(ListQuery),
    Get(String),
    Create(Value),
    Update(String, Value),
    Delete(String),
    Import(PathBuf),
    Export {
        format: ExportFormat,
        out: Option<PathBuf>,
    },
}

/// Parse a JSON object given on the command line or read from a file.
pub fn parse_body(text: &str) -> Result<Value> {
    let body: Value =
        serde_json::from_str(text).map_err(|e| anyhow::anyhow!("Invalid JSON: {}", e))?;
    if !body.is_object() {
        anyhow::bail!("Expected a JSON object.");
    }
    Ok(body)
}

pub async fn run(entity: Entity, action: Action, output: Output, config_path: &Path) -> Result<()> {
    let (_, console) = connect(config_path)?;
    match entity {
        Entity::Companies => execute(console.companies(), action, output).await,
        Entity::Customers => execute(console.customers(), action, output).await,
        Entity::Supplies => execute(console.supplies(), action, output).await,
        Entity::Taxes => execute(console.taxes(), action, output).await,
        Entity::Users => execute(console.users(), action, output).await,
        Entity::SupplyPrices => execute(console.supply_prices(), action, output).await,
    }
}

async fn execute<T: Resource>(
    controller: &EntityController<T>,
    action: Action,
    output: Output,
) -> Result<()> {
    match action {
        Action::List(query) => {
            controller.list(query).await?;
            let state = controller.state();
            let rows = to_rows(&state.items)?;
            match output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                Output::Table => {
                    print!("{}", render_table(&rows));
                    let p = state.pagination;
                    println!(
                        "Page {} of {} ({} {} total)",
                        p.current_page,
                        p.total_pages,
                        p.total_items,
                        T::PATH
                    );
                }
            }
        }
        Action::Get(id) => {
            let item = controller.get_by_id(&id).await?;
            print_one(&item, output)?;
        }
        Action::Create(body) => {
            let created = controller.create(&body).await?;
            print_one(&created, output)?;
        }
        Action::Update(id, body) => {
            let updated = controller.update(&id, &body).await?;
            print_one(&updated, output)?;
        }
        Action::Delete(id) => {
            controller.delete(&id).await?;
        }
        Action::Import(path) => {
            let file = FileUpload::read(&path)
                .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
            let progress = Progress::new();
            let ticker = tokio::spawn(report_progress(progress.clone()));
            let result = controller.import_with_progress(file, progress).await;
            ticker.abort();
            eprintln!();
            let report = result?;
            match output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                Output::Table => print!("{}", render_report(&report)),
            }
        }
        Action::Export { format, out } => {
            let file = controller.export(format).await?;
            let path = out.unwrap_or_else(|| PathBuf::from(&file.filename));
            std::fs::write(&path, &file.bytes)?;
            println!("Saved {} ({} bytes).", path.display(), file.bytes.len());
        }
    }
    Ok(())
}

async fn report_progress(progress: Progress) {
    let mut interval = tokio::time::interval(Duration::from_millis(200));
    loop {
        interval.tick().await;
        eprint!("\rUploading... {:>3}%", progress.get());
    }
}

fn print_one<T: Resource>(item: &T, output: Output) -> Result<()> {
    let value = serde_json::to_value(item)?;
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(&value)?),
        Output::Table => {
            if let Value::Object(fields) = &value {
                let width = fields.keys().map(String::len).max().unwrap_or(0);
                for (key, v) in fields {
                    println!("{:width$}  {}", key, cell(v), width = width);
                }
            }
        }
    }
    Ok(())
}

fn to_rows<T: Resource>(items: &[T]) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).map_err(Into::into))
        .collect()
}

const MAX_CELL: usize = 32;

fn cell(value: &Value) -> String {
    let text = match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_CELL {
        let cut: String = text.chars().take(MAX_CELL - 3).collect();
        format!("{cut}...")
    } else {
        text
    }
}

/// Column set: `id` first, then every other key seen across the rows.
fn columns(rows: &[Value]) -> Vec<String> {
    let mut cols = vec!["id".to_string()];
    for row in rows {
        if let Value::Object(fields) = row {
            for key in fields.keys() {
                if !cols.contains(key) {
                    cols.push(key.clone());
                }
            }
        }
    }
    cols
}

fn render_table(rows: &[Value]) -> String {
    if rows.is_empty() {
        return "No results.\n".to_string();
    }
    let cols = columns(rows);
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            cols.iter()
                .map(|c| row.get(c).map(cell).unwrap_or_else(|| "-".to_string()))
                .collect()
        })
        .collect();
    let widths: Vec<usize> = cols
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(c.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    let header: Vec<String> = cols.iter().map(|c| c.to_uppercase()).collect();
    for line in std::iter::once(&header).chain(cells.iter()) {
        let padded: Vec<String> = line
            .iter()
            .zip(&widths)
            .map(|(text, w)| format!("{:w$}", text, w = *w))
            .collect();
        out.push_str(padded.join("  ").trim_end());
        out.push('\n');
    }
    out
}

fn render_report(report: &ImportReport) -> String {
    let mut out = format!("Import: {}\n", report.summary());
    for row in &report.errors {
        out.push_str(&format!("  row {}: {}\n", row.row, row.message));
    }
    out
}
