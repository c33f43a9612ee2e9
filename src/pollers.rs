// Specialized pollers: portfolio, bot status, transactions and logs

use crate::api::{ApiClient, LogQuery, RequestOptions, TransactionQuery};
use crate::models::{BotName, BotStatus, ListPage, LogTail, PortfolioSummary, Transaction};
use crate::poller::{PollHandle, ResourceCell};
use crate::types::Resource;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{debug, info, warn};

pub const PORTFOLIO_INTERVAL: Duration = Duration::from_secs(30);
pub const BOTS_INTERVAL: Duration = Duration::from_secs(30);
pub const LOGS_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_LOG_LIMIT: u32 = 100;

struct Endpoint<T> {
    client: ApiClient,
    label: &'static str,
    cell: ResourceCell<T>,
}

impl<T> Endpoint<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn fetch(&self, endpoint: &str) {
        let applied = self
            .cell
            .run(self.client.request::<T>(endpoint, RequestOptions::get()))
            .await;
        if applied {
            if let Some(error) = self.cell.snapshot().error {
                warn!("⚠️  Failed to fetch {}: {}", self.label, error);
            }
        }
    }
}

fn replace_handle(slot: &Mutex<Option<PollHandle>>, handle: Option<PollHandle>) -> bool {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    let previous = std::mem::replace(&mut *slot, handle);
    previous.is_some()
}

fn handle_active(slot: &Mutex<Option<PollHandle>>) -> bool {
    slot.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map_or(false, PollHandle::is_active)
}

/// Poller for a fixed endpoint that returns a full snapshot.
///
/// Starts fetching as soon as it is created and keeps going every `interval`
/// until stopped or dropped. Each tick launches its fetch as a separate task,
/// so stopping the timer never cancels a request already sent.
pub struct SnapshotPoller<T> {
    inner: Arc<Endpoint<T>>,
    endpoint: &'static str,
    interval: Duration,
    handle: Mutex<Option<PollHandle>>,
}

pub type PortfolioPoller = SnapshotPoller<PortfolioSummary>;
pub type BotsPoller = SnapshotPoller<Vec<BotStatus>>;

impl<T> SnapshotPoller<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Mount a poller on `endpoint`. Must be called inside a Tokio runtime.
    pub fn mount(client: ApiClient, endpoint: &'static str, label: &'static str, interval: Duration) -> Self {
        let inner = Arc::new(Endpoint {
            client,
            label,
            cell: ResourceCell::new(true),
        });
        let task_inner = inner.clone();
        let handle = PollHandle::spawn(interval, true, move || {
            let inner = task_inner.clone();
            async move {
                tokio::spawn(async move { inner.fetch(endpoint).await });
            }
        });
        info!("Polling {} every {:?}", label, interval);
        Self {
            inner,
            endpoint,
            interval,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn snapshot(&self) -> Resource<T> {
        self.inner.cell.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Resource<T>> {
        self.inner.cell.subscribe()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch right now, independent of the timer.
    pub async fn refresh(&self) {
        self.inner.fetch(self.endpoint).await;
    }

    pub fn is_polling(&self) -> bool {
        handle_active(&self.handle)
    }

    /// Stop the timer. Idempotent; a fetch already in flight still completes.
    pub fn stop(&self) {
        if replace_handle(&self.handle, None) {
            debug!("Stopped polling {}", self.inner.label);
        }
    }
}

impl SnapshotPoller<PortfolioSummary> {
    pub fn portfolio(client: ApiClient, interval: Duration) -> Self {
        Self::mount(client, "/api/portfolio", "portfolio", interval)
    }
}

impl SnapshotPoller<Vec<BotStatus>> {
    pub fn bots(client: ApiClient, interval: Duration) -> Self {
        Self::mount(client, "/api/bots", "bot status", interval)
    }

    /// Latest known status of one bot.
    pub fn bot(&self, name: BotName) -> Option<BotStatus> {
        self.snapshot()
            .value
            .and_then(|bots| bots.into_iter().find(|bot| bot.name == name))
    }
}

/// Something that renders to an endpoint path with query string.
pub trait PollQuery: Clone + Send + Sync + 'static {
    fn endpoint(&self) -> String;
}

impl PollQuery for TransactionQuery {
    fn endpoint(&self) -> String {
        TransactionQuery::endpoint(self)
    }
}

impl PollQuery for LogQuery {
    fn endpoint(&self) -> String {
        LogQuery::endpoint(self)
    }
}

/// Poller whose request depends on caller-supplied filters.
///
/// Idle until the first `fetch` or `start_polling`.
pub struct FilteredPoller<Q, T> {
    inner: Arc<Endpoint<T>>,
    handle: Mutex<Option<PollHandle>>,
    _query: PhantomData<fn(Q)>,
}

impl<Q, T> FilteredPoller<Q, T>
where
    Q: PollQuery,
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(client: ApiClient, label: &'static str) -> Self {
        Self {
            inner: Arc::new(Endpoint {
                client,
                label,
                cell: ResourceCell::new(false),
            }),
            handle: Mutex::new(None),
            _query: PhantomData,
        }
    }

    pub fn snapshot(&self) -> Resource<T> {
        self.inner.cell.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Resource<T>> {
        self.inner.cell.subscribe()
    }

    /// Exactly one request, now, bypassing the timer.
    pub async fn fetch(&self, query: &Q) {
        self.inner.fetch(&query.endpoint()).await;
    }

    /// Fetch now and then every `interval` with the same filters.
    /// Replaces any timer already running.
    pub fn start_polling(&self, query: Q, interval: Duration) {
        let endpoint = query.endpoint();
        let task_inner = self.inner.clone();
        let handle = PollHandle::spawn(interval, true, move || {
            let inner = task_inner.clone();
            let endpoint = endpoint.clone();
            async move {
                tokio::spawn(async move { inner.fetch(&endpoint).await });
            }
        });
        if replace_handle(&self.handle, Some(handle)) {
            debug!("Replaced running {} poll", self.inner.label);
        }
        info!("Polling {} every {:?}", self.inner.label, interval);
    }

    pub fn stop_polling(&self) {
        if replace_handle(&self.handle, None) {
            debug!("Stopped polling {}", self.inner.label);
        }
    }

    pub fn is_polling(&self) -> bool {
        handle_active(&self.handle)
    }
}

/// Paged transaction history. Fetches only on demand.
pub struct TransactionsPoller {
    inner: FilteredPoller<TransactionQuery, ListPage<Transaction>>,
    page_size: u32,
}

impl TransactionsPoller {
    pub fn new(client: ApiClient, page_size: u32) -> Self {
        Self {
            inner: FilteredPoller::new(client, "transactions"),
            page_size,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn query(&self, page: u32, bot: Option<BotName>, search: Option<&str>) -> TransactionQuery {
        TransactionQuery {
            page,
            limit: self.page_size,
            bot,
            search: search.map(str::to_string),
        }
    }

    /// Load zero-based `page`, replacing whatever page was shown before.
    pub async fn fetch(&self, page: u32, bot: Option<BotName>, search: Option<&str>) {
        let query = self.query(page, bot, search);
        self.inner.fetch(&query).await;
    }

    pub fn snapshot(&self) -> Resource<ListPage<Transaction>> {
        self.inner.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Resource<ListPage<Transaction>>> {
        self.inner.subscribe()
    }

    pub fn total(&self) -> u64 {
        self.snapshot().value.map_or(0, |page| page.total)
    }

    pub fn has_more(&self) -> bool {
        self.snapshot().value.map_or(false, |page| page.has_more)
    }
}

/// Filtered log tail. Every fetch is a full snapshot of the newest matching lines.
pub struct LogsPoller {
    inner: FilteredPoller<LogQuery, LogTail>,
    interval: Duration,
}

impl LogsPoller {
    pub fn new(client: ApiClient, interval: Duration) -> Self {
        Self {
            inner: FilteredPoller::new(client, "logs"),
            interval,
        }
    }

    pub async fn fetch(&self, query: &LogQuery) {
        self.inner.fetch(query).await;
    }

    pub fn start_polling(&self, query: LogQuery) {
        self.inner.start_polling(query, self.interval);
    }

    pub fn stop_polling(&self) {
        self.inner.stop_polling();
    }

    pub fn is_polling(&self) -> bool {
        self.inner.is_polling()
    }

    pub fn snapshot(&self) -> Resource<LogTail> {
        self.inner.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Resource<LogTail>> {
        self.inner.subscribe()
    }
}
