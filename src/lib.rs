// Trading dashboard client library
// Session handling, authenticated requests and polled views over the trading backend's REST API

pub mod types;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod transport;
pub mod api;
pub mod session;
pub mod poller;
pub mod pollers;
pub mod invoker;
pub mod monitor;

// Re-export commonly used types
pub use types::*;
pub use error::*;
pub use models::*;
pub use api::{ApiClient, LogQuery, RequestOptions, TransactionQuery};
pub use config::{CliConfig, Command, DashboardSettings, PollingSettings};
pub use invoker::{ActionInvoker, BotAction};
pub use monitor::{DashboardMonitor, LogCursor, MonitorExit};
pub use poller::PollHandle;
pub use pollers::{BotsPoller, LogsPoller, PortfolioPoller, SnapshotPoller, TransactionsPoller};
pub use session::{AuthMode, AuthSettings, ConsoleNavigator, Navigator, RecordingNavigator, SessionGuard};
pub use storage::{CredentialStore, FileStore, MemoryStore, StoreError};
pub use transport::{HttpRequest, HttpResponse, MockReply, MockTransport, ReqwestTransport, Transport, TransportError};

// Global dashboard history logger
use std::fs::File;
use std::io::Write;
use std::sync::{Mutex, OnceLock};

static HISTORY_FILE: OnceLock<Mutex<File>> = OnceLock::new();

/// Initialize the global history file writer (called by the binary)
pub fn init_history_file(file: File) {
    // Only the first call wins; later calls keep the existing writer
    let _ = HISTORY_FILE.set(Mutex::new(file));
}

/// Append a raw message to the history file, if one was initialized.
pub fn log_to_history(message: &str) {
    if let Some(file_mutex) = HISTORY_FILE.get() {
        if let Ok(mut file) = file_mutex.lock() {
            let _ = write!(file, "{}", message);
            let _ = file.flush();
        }
    }
}

/// Record a session or control event with a UTC timestamp
pub fn log_dashboard_event(event: &str) {
    use chrono::Utc;
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    log_to_history(&format!("[{}] {}\n", timestamp, event));
}
