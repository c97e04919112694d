//! Import/export payloads.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

// ── Import ──────────────────────────────────────────────────────────

/// A file selected for import, held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    /// Content type is inferred from the file extension.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = content_type_for(&file_name).to_string();
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(name, bytes))
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("csv") => ExportFormat::Csv.mime(),
        Some("xlsx") => ExportFormat::Xlsx.mime(),
        Some("xls") => "application/vnd.ms-excel",
        _ => "application/octet-stream",
    }
}

/// Transfer progress, 0–100, that never moves backwards.
///
/// Cloning shares the underlying counter, so the uploader and whoever
/// displays the progress observe the same value.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<AtomicU8>);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    /// Raise progress to `percent` (capped at 100). Lower values are ignored.
    pub fn advance_to(&self, percent: u8) {
        self.0.fetch_max(percent.min(100), Ordering::AcqRel);
    }

    pub fn complete(&self) {
        self.advance_to(100);
    }
}

/// One rejected row of an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based row number in the source file.
    pub row: u64,
    pub message: String,
    /// The offending values, as the server echoed them back.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Outcome of an import. Rows that succeeded stay committed even when
/// others failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub errors: Vec<RowError>,
}

impl ImportReport {
    /// Enforce `success_count + error_count <= total_processed`.
    ///
    /// A backend that under-reports the total gets it raised to the sum.
    pub fn normalized(mut self) -> Self {
        let accounted = self.success_count.saturating_add(self.error_count);
        if accounted > self.total_processed {
            warn!(
                total = self.total_processed,
                success = self.success_count,
                errors = self.error_count,
                "import report under-counts processed rows"
            );
            self.total_processed = accounted;
        }
        self
    }

    pub fn is_partial(&self) -> bool {
        self.error_count > 0 && self.success_count > 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} processed, {} imported, {} rejected",
            self.total_processed, self.success_count, self.error_count
        )
    }
}

// ── Export ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    /// Filename used when the server does not send one.
    pub fn default_filename(&self, resource_path: &str, date: chrono::NaiveDate) -> String {
        format!(
            "{}_{}.{}",
            resource_path.replace('-', "_"),
            date.format("%Y%m%d"),
            self.extension()
        )
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

/// A downloaded export, ready to be saved.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Extract the filename from a `Content-Disposition` header value.
///
/// Prefers RFC 5987 `filename*=UTF-8''...` over plain `filename=`. Any
/// directory components are stripped.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for part in header.split(';').map(str::trim) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let value = value.trim().trim_matches('"');
                let encoded = value.splitn(3, '\'').nth(2).unwrap_or(value);
                extended = Some(percent_decode(encoded));
            }
            "filename" => plain = Some(value.trim().trim_matches('"').to_string()),
            _ => {}
        }
    }

    extended
        .or(plain)
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or_default().to_string())
        .filter(|name| !name.is_empty())
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotonic_and_capped() {
        let p = Progress::new();
        p.advance_to(40);
        p.advance_to(10);
        assert_eq!(p.get(), 40);
        let shared = p.clone();
        shared.advance_to(250);
        assert_eq!(p.get(), 100);
    }

    #[test]
    fn report_invariant_is_enforced() {
        let report = ImportReport {
            total_processed: 5,
            success_count: 7,
            error_count: 3,
            errors: vec![],
        }
        .normalized();
        assert_eq!(report.total_processed, 10);

        let report: ImportReport = serde_json::from_str(
            r#"{"total_processed": 10, "success_count": 7, "error_count": 3,
                "errors": [{"row": 4, "message": "RUC inválido", "data": {"ruc": "12"}}]}"#,
        )
        .unwrap();
        let report = report.normalized();
        assert_eq!(report.total_processed, 10);
        assert!(report.is_partial());
        assert_eq!(report.errors[0].row, 4);
        assert_eq!(report.summary(), "10 processed, 7 imported, 3 rejected");
    }

    #[test]
    fn oversized_counts_saturate() {
        let report = ImportReport {
            total_processed: 1,
            success_count: u64::MAX,
            error_count: 2,
            errors: Vec::new(),
        }
        .normalized();
        assert_eq!(report.total_processed, u64::MAX);
        assert_eq!(report.success_count, u64::MAX);
    }

    #[test]
    fn upload_content_type_from_extension() {
        assert_eq!(FileUpload::new("a.CSV", vec![]).content_type, "text/csv");
        assert_eq!(FileUpload::new("a.xlsx", vec![]).content_type, ExportFormat::Xlsx.mime());
        assert_eq!(FileUpload::new("a", vec![1]).content_type, "application/octet-stream");
    }

    #[test]
    fn content_disposition_parsing() {
        assert_eq!(
            content_disposition_filename(r#"attachment; filename="clientes.csv""#).as_deref(),
            Some("clientes.csv")
        );
        assert_eq!(
            content_disposition_filename(
                r#"attachment; filename="fallback.csv"; filename*=UTF-8''precios%202024.xlsx"#
            )
            .as_deref(),
            Some("precios 2024.xlsx")
        );
        assert_eq!(
            content_disposition_filename("attachment; filename=../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(content_disposition_filename("inline"), None);
        assert_eq!(content_disposition_filename("attachment; filename=\"\""), None);
    }

    #[test]
    fn default_export_filename() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            ExportFormat::Xlsx.default_filename("supplies-prices", date),
            "supplies_prices_20240309.xlsx"
        );
        assert_eq!("XLSX".parse::<ExportFormat>(), Ok(ExportFormat::Xlsx));
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
