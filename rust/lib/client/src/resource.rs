use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sipreciconts_core::{
    content_disposition_filename, normalize_list, ApiError, ExportFile, ExportFormat, FileUpload,
    ImportReport, ListQuery, Page, Progress, Resource,
};
use tracing::info;

use crate::pipeline::{Envelope, Pipeline};

/// CRUD, import and export for one entity collection.
///
/// The seam between list controllers and the network: controllers are
/// generic over this trait, production code uses [`ResourceService`].
#[async_trait]
pub trait ResourceApi<T>: Send + Sync + 'static {
    async fn list(&self, query: &ListQuery) -> Result<Page<T>, ApiError>;
    async fn get(&self, id: &str) -> Result<T, ApiError>;
    async fn create(&self, data: &Value) -> Result<T, ApiError>;
    async fn update(&self, id: &str, data: &Value) -> Result<T, ApiError>;
    async fn delete(&self, id: &str) -> Result<(), ApiError>;
    async fn import(&self, file: FileUpload, progress: Progress) -> Result<ImportReport, ApiError>;
    async fn export(&self, format: ExportFormat) -> Result<ExportFile, ApiError>;
}

/// [`ResourceApi`] over the authenticated pipeline.
///
/// Endpoints: `/{path}/`, `/{path}/{id}/`, `/{path}/import/` and
/// `/{path}/export/?format=csv|xlsx`, where `path` is `T::PATH`.
pub struct ResourceService<T: Resource> {
    pipeline: Arc<Pipeline>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Resource> Clone for ResourceService<T> {
    fn clone(&self) -> Self {
        Self::new(self.pipeline.clone())
    }
}

impl<T: Resource> ResourceService<T> {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            _phantom: PhantomData,
        }
    }

    fn collection_path() -> String {
        format!("/{}/", T::PATH)
    }

    fn item_path(id: &str) -> String {
        format!("/{}/{}/", T::PATH, id.trim_matches('/'))
    }
}

#[async_trait]
impl<T: Resource> ResourceApi<T> for ResourceService<T> {
    async fn list(&self, query: &ListQuery) -> Result<Page<T>, ApiError> {
        let envelope = Envelope::get(Self::collection_path()).with_query(query.to_params());
        let body: Value = self.pipeline.json(envelope).await?;
        normalize_list(body)
    }

    async fn get(&self, id: &str) -> Result<T, ApiError> {
        self.pipeline.json(Envelope::get(Self::item_path(id))).await
    }

    async fn create(&self, data: &Value) -> Result<T, ApiError> {
        let created: T = self
            .pipeline
            .json(Envelope::post(Self::collection_path()).with_json(data.clone()))
            .await?;
        info!(resource = T::PATH, id = %created.id(), "created");
        Ok(created)
    }

    async fn update(&self, id: &str, data: &Value) -> Result<T, ApiError> {
        let updated = self
            .pipeline
            .json(Envelope::put(Self::item_path(id)).with_json(data.clone()))
            .await?;
        info!(resource = T::PATH, id, "updated");
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.pipeline
            .no_content(Envelope::delete(Self::item_path(id)))
            .await?;
        info!(resource = T::PATH, id, "deleted");
        Ok(())
    }

    async fn import(&self, file: FileUpload, progress: Progress) -> Result<ImportReport, ApiError> {
        info!(resource = T::PATH, file = %file.file_name, size = file.size(), "importing");
        let envelope = Envelope::post(format!("/{}/import/", T::PATH)).with_file(file);
        let report: ImportReport = self.pipeline.upload(envelope, &progress).await?;
        let report = report.normalized();
        info!(resource = T::PATH, summary = %report.summary(), "import finished");
        Ok(report)
    }

    async fn export(&self, format: ExportFormat) -> Result<ExportFile, ApiError> {
        let envelope = Envelope::get(format!("/{}/export/", T::PATH))
            .with_query(vec![("format".to_string(), format.extension().to_string())])
            .with_accept(format.mime());
        let download = self.pipeline.download(envelope).await?;

        let filename = download
            .content_disposition
            .as_deref()
            .and_then(content_disposition_filename)
            .unwrap_or_else(|| format.default_filename(T::PATH, chrono::Local::now().date_naive()));
        let content_type = download
            .content_type
            .unwrap_or_else(|| format.mime().to_string());

        Ok(ExportFile {
            filename,
            content_type,
            bytes: download.bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::mock::MockBackend;
    use crate::session::SessionManager;
    use serde_json::json;
    use sipreciconts_core::{Customer, ErrorCode, SortOrder};
    use sipreciconts_kv::{KVStore, MemoryStore};

    async fn service(backend: &MockBackend) -> ResourceService<Customer> {
        let store: Arc<dyn KVStore> = Arc::new(MemoryStore::new());
        let session = SessionManager::new(store, ClientConfig::new(backend.base_url())).unwrap();
        session.set_access_token(&backend.access_token(3600)).unwrap();
        session.set_refresh_token("r1").unwrap();
        ResourceService::new(Arc::new(Pipeline::new(Arc::new(session))))
    }

    #[tokio::test]
    async fn list_sends_query_and_normalizes_page() {
        let backend = MockBackend::start().await;
        let customers = service(&backend).await;

        let query = ListQuery::default()
            .with_search("acme")
            .with_sort("name", SortOrder::Desc)
            .with_page(3);
        let page = customers.list(&query).await.unwrap();

        assert_eq!(page.total, 25);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].name, "Cliente 1");

        let sent = backend.last_query();
        assert!(sent.contains(&("page".into(), "3".into())));
        assert!(sent.contains(&("page_size".into(), "10".into())));
        assert!(sent.contains(&("search".into(), "acme".into())));
        assert!(sent.contains(&("sort_order".into(), "desc".into())));
    }

    #[tokio::test]
    async fn crud_round() {
        let backend = MockBackend::start().await;
        let customers = service(&backend).await;

        let one = customers.get("5").await.unwrap();
        assert_eq!(one.id.as_str(), "5");

        let created = customers
            .create(&json!({"name": "Nuevo SAC", "ruc": "20999999991"}))
            .await
            .unwrap();
        assert_eq!(created.id.as_str(), "99");
        assert_eq!(created.name, "Nuevo SAC");

        let updated = customers.update("5", &json!({"phone": "999"})).await.unwrap();
        assert_eq!(updated.phone.as_deref(), Some("999"));
        assert_eq!(updated.name, "Cliente 5");

        customers.delete("5").await.unwrap();

        let err = customers.get("404").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn import_uploads_file_and_reports_rows() {
        let backend = MockBackend::start().await;
        let customers = service(&backend).await;

        let csv = "name,ruc\n".to_string() + &"Cliente,20123456789\n".repeat(10_000);
        let size = csv.len();
        let progress = Progress::new();
        let report = customers
            .import(FileUpload::new("clientes.csv", csv.into_bytes()), progress.clone())
            .await
            .unwrap();

        assert_eq!(report.total_processed, 10);
        assert_eq!(report.success_count, 7);
        assert_eq!(report.error_count, 3);
        assert_eq!(report.errors.iter().map(|e| e.row).collect::<Vec<_>>(), vec![2, 5, 9]);
        assert_eq!(progress.get(), 100);
        assert_eq!(
            *backend.state.last_upload.lock().unwrap(),
            Some(("clientes.csv".to_string(), size))
        );
    }

    #[tokio::test]
    async fn export_uses_disposition_filename_or_default() {
        let backend = MockBackend::start().await;
        let customers = service(&backend).await;

        let xlsx = customers.export(ExportFormat::Xlsx).await.unwrap();
        assert_eq!(xlsx.filename, "clientes 2024.xlsx");
        assert_eq!(xlsx.content_type, ExportFormat::Xlsx.mime());
        assert_eq!(xlsx.bytes, vec![0x50, 0x4b, 0x03, 0x04]);
        assert_eq!(backend.last_header("accept").as_deref(), Some(ExportFormat::Xlsx.mime()));

        let csv = customers.export(ExportFormat::Csv).await.unwrap();
        assert!(csv.filename.starts_with("customers_"));
        assert!(csv.filename.ends_with(".csv"));
        assert_eq!(csv.bytes, b"id,name\n1,Cliente 1\n".to_vec());
    }
}
