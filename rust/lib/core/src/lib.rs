//! Shared vocabulary of the SiPreciConts client: the error taxonomy, the
//! entity models served by the REST backend, list queries and pagination,
//! and import/export payloads.

pub mod error;
pub mod model;
pub mod query;
pub mod transfer;
pub mod types;

pub use error::{error_code, ApiError, ErrorCode, FieldErrors};
pub use model::{Company, Customer, Resource, Supply, SupplyPrice, Tax, User};
pub use query::{normalize_list, ListQuery, Page, Pagination, SortOrder};
pub use transfer::{
    content_disposition_filename, ExportFile, ExportFormat, FileUpload, ImportReport, Progress,
    RowError,
};
pub use types::{merge_patch, Id};
