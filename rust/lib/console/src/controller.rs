//! Generic list-resource controller.
//!
//! State machine per instance: `Idle → Loading → Loaded | Error`, and back
//! to `Loading` on every search, page, sort or reload trigger. Loads are
//! tagged; only the most recently triggered one may write state, whatever
//! order the responses arrive in.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use sipreciconts_client::ResourceApi;
use sipreciconts_core::{
    ApiError, ExportFile, ExportFormat, FileUpload, ImportReport, ListQuery, Page, Pagination,
    Progress, Resource, SortOrder,
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::notify::{Notification, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStatus {
    Idle,
    Loading,
    Loaded,
    Error,
}

/// Observable list state.
#[derive(Debug, Clone, PartialEq)]
pub struct ListState<T> {
    pub status: ListStatus,
    /// Items of the last successful load. Kept across failed loads.
    pub items: Vec<T>,
    pub error: Option<ApiError>,
    pub pagination: Pagination,
    /// Query of the most recently triggered load. It was applied only
    /// when `status` is `Loaded`.
    pub query: ListQuery,
}

impl<T> ListState<T> {
    fn initial(query: ListQuery) -> Self {
        Self {
            status: ListStatus::Idle,
            items: Vec::new(),
            error: None,
            pagination: Pagination {
                page_size: query.page_size,
                ..Pagination::default()
            },
            query,
        }
    }

    pub fn loading(&self) -> bool {
        self.status == ListStatus::Loading
    }

    /// Whether the last load succeeded with a query matching `pred`.
    fn applied(&self, pred: impl FnOnce(&ListQuery) -> bool) -> bool {
        self.status == ListStatus::Loaded && pred(&self.query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    pub page_size: u32,
    pub search_debounce_ms: u64,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            page_size: 10,
            search_debounce_ms: 300,
            sort_by: None,
            sort_order: SortOrder::Asc,
        }
    }
}

impl ControllerOptions {
    fn initial_query(&self) -> ListQuery {
        let query = ListQuery::default().with_page_size(self.page_size);
        match &self.sort_by {
            Some(field) => query.with_sort(field.clone(), self.sort_order),
            None => query,
        }
    }

    fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

/// What became of one triggered load.
enum Load {
    Applied,
    /// Identical to the load already in flight.
    Ignored,
    /// A newer load was triggered before this one settled.
    Superseded,
    /// The controller was unmounted before or while the load ran.
    Inactive,
    Failed(ApiError),
}

#[derive(Default)]
struct LoadTracker {
    /// Tag of the most recently triggered load.
    latest: u64,
    /// Its query, while it runs.
    in_flight: Option<ListQuery>,
}

struct Inner<T, A> {
    api: Arc<A>,
    notifier: Arc<dyn Notifier>,
    options: ControllerOptions,
    state: watch::Sender<ListState<T>>,
    mounted: AtomicBool,
    active: AtomicBool,
    /// Also serializes `Loading` writes against `unmount`.
    loads: Mutex<LoadTracker>,
    search_epoch: AtomicU64,
}

/// List state plus CRUD dispatch for one entity type `T`, served by `A`.
///
/// Cheap to clone; clones share state.
pub struct ListController<T, A> {
    inner: Arc<Inner<T, A>>,
}

impl<T, A> Clone for ListController<T, A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn lock<V>(m: &Mutex<V>) -> MutexGuard<'_, V> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: Resource, A: ResourceApi<T>> ListController<T, A> {
    pub fn new(api: Arc<A>, notifier: Arc<dyn Notifier>, options: ControllerOptions) -> Self {
        let (state, _) = watch::channel(ListState::initial(options.initial_query()));
        Self {
            inner: Arc::new(Inner {
                api,
                notifier,
                options,
                state,
                mounted: AtomicBool::new(false),
                active: AtomicBool::new(true),
                loads: Mutex::new(LoadTracker::default()),
                search_epoch: AtomicU64::new(0),
            }),
        }
    }

    // ── Read side ───────────────────────────────────────────────────

    pub fn state(&self) -> ListState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ListState<T>> {
        self.inner.state.subscribe()
    }

    pub fn items(&self) -> Vec<T> {
        self.inner.state.borrow().items.clone()
    }

    pub fn loading(&self) -> bool {
        self.inner.state.borrow().loading()
    }

    pub fn error(&self) -> Option<ApiError> {
        self.inner.state.borrow().error.clone()
    }

    pub fn pagination(&self) -> Pagination {
        self.inner.state.borrow().pagination
    }

    fn current_query(&self) -> ListQuery {
        self.inner.state.borrow().query.clone()
    }

    fn already_applied(&self, pred: impl FnOnce(&ListQuery) -> bool) -> bool {
        self.inner.state.borrow().applied(pred)
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Fire the initial load. Only the first call after construction or
    /// after an `unmount` does anything.
    pub async fn mount(&self) {
        self.activate();
        if self.inner.mounted.swap(true, Ordering::AcqRel) {
            debug!(resource = T::PATH, "already mounted");
            return;
        }
        self.load(self.inner.options.initial_query()).await;
    }

    /// Stop writing state. Responses still in flight are dropped, later
    /// triggers are ignored and an interrupted load leaves the list `Idle`.
    pub fn unmount(&self) {
        self.inner.search_epoch.fetch_add(1, Ordering::AcqRel);
        let mut loads = lock(&self.inner.loads);
        self.inner.active.store(false, Ordering::Release);
        self.inner.mounted.store(false, Ordering::Release);
        loads.latest += 1;
        loads.in_flight = None;
        self.inner.state.send_if_modified(|s| {
            let interrupted = s.loading();
            if interrupted {
                s.status = ListStatus::Idle;
            }
            interrupted
        });
        debug!(resource = T::PATH, "unmounted");
    }

    /// Accept triggers again after an `unmount`, e.g. once the user has
    /// signed back in. The list keeps its last state until the next load.
    pub fn activate(&self) {
        let _loads = lock(&self.inner.loads);
        if !self.inner.active.swap(true, Ordering::AcqRel) {
            debug!(resource = T::PATH, "reactivated");
        }
    }

    // ── Triggers ────────────────────────────────────────────────────

    /// Debounced search. Acts only on the last term of a burst, and only
    /// if it differs from the term of the last successful load. Always goes
    /// back to page 1.
    pub async fn handle_search(&self, term: impl Into<String>) {
        let term = term.into().trim().to_string();
        let epoch = self.inner.search_epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let debounce = self.inner.options.search_debounce();
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        if self.inner.search_epoch.load(Ordering::Acquire) != epoch {
            return;
        }
        if self.already_applied(|q| q.search == term) {
            return;
        }
        self.load(self.current_query().with_search(term)).await;
    }

    /// Ignored only when `page` is the page last loaded successfully; a
    /// failed page change can be retried.
    pub async fn handle_page_change(&self, page: u32) {
        let page = page.max(1);
        if self.already_applied(|q| q.page == page) {
            return;
        }
        self.load(self.current_query().with_page(page)).await;
    }

    pub async fn handle_sort(&self, field: impl Into<String>, order: SortOrder) {
        let field = field.into();
        let same =
            |q: &ListQuery| q.sort_by.as_deref() == Some(field.as_str()) && q.sort_order == order;
        if self.already_applied(same) {
            return;
        }
        self.load(self.current_query().with_sort(field, order)).await;
    }

    pub async fn handle_page_size(&self, page_size: u32) {
        let page_size = page_size.max(1);
        if self.already_applied(|q| q.page_size == page_size) {
            return;
        }
        self.load(self.current_query().with_page_size(page_size)).await;
    }

    pub async fn reload_items(&self) {
        self.load(self.current_query()).await;
    }

    /// Delete, then reload the current page from the server.
    pub async fn handle_delete(&self, id: &str) -> Result<(), ApiError> {
        self.delete(id).await?;
        self.reload_items().await;
        Ok(())
    }

    // ── Contract ────────────────────────────────────────────────────

    /// Load `query` into the list state. A failed load is also recorded
    /// in the state and notified. A load cut short by an `unmount` still
    /// returns its error, but leaves the state alone.
    pub async fn list(&self, query: ListQuery) -> Result<(), ApiError> {
        match self.load(query).await {
            Load::Failed(e) => Err(e),
            Load::Inactive => Err(ApiError::internal(format!("{} list is not mounted", T::NAME))),
            Load::Applied | Load::Ignored | Load::Superseded => Ok(()),
        }
    }

    /// One-off fetch that leaves the list state alone.
    pub async fn fetch_page(&self, query: &ListQuery) -> Result<Page<T>, ApiError> {
        self.inner.api.list(query).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<T, ApiError> {
        self.inner.api.get(id).await
    }

    pub async fn create(&self, data: &Value) -> Result<T, ApiError> {
        let result = self.inner.api.create(data).await;
        let created = self.announce(result, |_| format!("Created {}", T::NAME))?;
        self.reload_items().await;
        Ok(created)
    }

    pub async fn update(&self, id: &str, data: &Value) -> Result<T, ApiError> {
        let result = self.inner.api.update(id, data).await;
        let updated = self.announce(result, |_| format!("Updated {}", T::NAME))?;
        self.reload_items().await;
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let result = self.inner.api.delete(id).await;
        self.announce(result, |_| format!("Deleted {}", T::NAME))
    }

    pub async fn import(&self, file: FileUpload) -> Result<ImportReport, ApiError> {
        self.import_with_progress(file, Progress::new()).await
    }

    /// Import, then reload page 1 with the search cleared. Partial
    /// success still reloads.
    pub async fn import_with_progress(
        &self,
        file: FileUpload,
        progress: Progress,
    ) -> Result<ImportReport, ApiError> {
        let report = match self.inner.api.import(file, progress).await {
            Ok(report) => report,
            Err(e) => {
                self.inner.notifier.notify(Notification::error(e.user_message()));
                return Err(e);
            }
        };

        let message = format!("{} import: {}", T::NAME, report.summary());
        self.inner.notifier.notify(if report.error_count == 0 {
            Notification::success(message)
        } else {
            Notification::warning(message)
        });

        self.load(self.current_query().with_search("")).await;
        Ok(report)
    }

    /// Download an export. List state is not touched.
    pub async fn export(&self, format: ExportFormat) -> Result<ExportFile, ApiError> {
        let result = self.inner.api.export(format).await;
        self.announce(result, |file| format!("Exported {}", file.filename))
    }

    fn announce<R>(
        &self,
        result: Result<R, ApiError>,
        success: impl FnOnce(&R) -> String,
    ) -> Result<R, ApiError> {
        match &result {
            Ok(value) => self.inner.notifier.notify(Notification::success(success(value))),
            Err(e) => {
                warn!(resource = T::PATH, error = %e, "operation failed");
                self.inner.notifier.notify(Notification::error(e.user_message()));
            }
        }
        result
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Tag a new load and mark the list `Loading`.
    fn begin(&self, query: &ListQuery) -> Result<u64, Load> {
        let mut loads = lock(&self.inner.loads);
        if !self.is_active() {
            return Err(Load::Inactive);
        }
        if loads.in_flight.as_ref() == Some(query) {
            debug!(resource = T::PATH, "identical load in flight, ignoring trigger");
            return Err(Load::Ignored);
        }
        loads.latest += 1;
        loads.in_flight = Some(query.clone());
        self.inner.state.send_modify(|s| {
            s.status = ListStatus::Loading;
            s.error = None;
            s.query = query.clone();
        });
        Ok(loads.latest)
    }

    /// Apply `write` if `tag` is still the latest load, which then stops
    /// being in flight. `write` returns whether it changed the state.
    fn settle(&self, tag: u64, write: impl FnOnce(&mut ListState<T>) -> bool) -> bool {
        let mut loads = lock(&self.inner.loads);
        if loads.latest != tag {
            return false;
        }
        loads.in_flight = None;
        self.inner.state.send_if_modified(write);
        true
    }

    /// Outcome of a load that lost its tag: either a newer trigger took
    /// over, or the controller was unmounted while it ran.
    fn dropped(&self, tag: u64, error: Option<ApiError>) -> Load {
        if self.is_active() {
            debug!(resource = T::PATH, tag, "dropping superseded list response");
            return Load::Superseded;
        }
        debug!(resource = T::PATH, tag, "unmounted while loading, dropping response");
        match error {
            Some(e) => Load::Failed(e),
            None => Load::Inactive,
        }
    }

    async fn load(&self, mut query: ListQuery) -> Load {
        loop {
            let tag = match self.begin(&query) {
                Ok(tag) => tag,
                Err(outcome) => return outcome,
            };

            match self.inner.api.list(&query).await {
                Ok(page) => {
                    let pagination = Pagination::compute(page.total, query.page_size, query.page);
                    if page.items.is_empty() && pagination.current_page != query.page {
                        if !self.settle(tag, |_| false) {
                            return self.dropped(tag, None);
                        }
                        debug!(
                            resource = T::PATH,
                            requested = query.page,
                            clamped = pagination.current_page,
                            "page out of range, loading the last page"
                        );
                        query = query.with_page(pagination.current_page);
                        continue;
                    }
                    query.page = pagination.current_page;
                    let applied = self.settle(tag, |s| {
                        s.status = ListStatus::Loaded;
                        s.items = page.items;
                        s.pagination = pagination;
                        s.query = query;
                        true
                    });
                    if !applied {
                        return self.dropped(tag, None);
                    }
                    return Load::Applied;
                }
                Err(e) => {
                    let recorded = self.settle(tag, |s| {
                        s.status = ListStatus::Error;
                        s.error = Some(e.clone());
                        true
                    });
                    if !recorded {
                        return self.dropped(tag, Some(e));
                    }
                    warn!(resource = T::PATH, error = %e, "list load failed");
                    self.inner.notifier.notify(Notification::error(e.user_message()));
                    return Load::Failed(e);
                }
            }
        }
    }
}
