// Live terminal view over the portfolio, bot status and log pollers

use crate::api::{ApiClient, LogQuery};
use crate::config::PollingSettings;
use crate::models::{BotStatus, LogEntry, LogTail, PortfolioSummary, Transaction};
use crate::pollers::{BotsPoller, LogsPoller, PortfolioPoller, SnapshotPoller};
use crate::session::SessionGuard;
use crate::types::{Phase, Resource, SessionStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Why [`DashboardMonitor::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorExit {
    Shutdown,
    SessionEnded(Option<String>),
}

fn money(value: Decimal) -> String {
    format!("${:.2}", value)
}

fn signed_money(value: Decimal) -> String {
    let sign = if value.is_sign_negative() { "-" } else { "+" };
    format!("{}${:.2}", sign, value.abs())
}

fn signed_percent(value: Decimal) -> String {
    let sign = if value.is_sign_negative() { "-" } else { "+" };
    format!("{}{:.2}%", sign, value.abs())
}

/// True once a fetch has settled; intermediate loading flips are not worth a line.
fn settled<T>(resource: &Resource<T>) -> bool {
    !resource.is_loading && matches!(resource.phase, Phase::Ready | Phase::Errored)
}

fn stale_suffix<T>(resource: &Resource<T>) -> String {
    match &resource.error {
        Some(e) => format!(" | ⚠️  stale: {}", e.message),
        None => String::new(),
    }
}

/// Compact one-line portfolio summary. A failed refresh keeps the last value and says so.
pub fn format_portfolio_line(resource: &Resource<PortfolioSummary>) -> Option<String> {
    match (&resource.value, &resource.error) {
        (Some(p), _) => Some(format!(
            "💼 Value {} | P&L {} ({}) | Today {} ({}) | K {} C {} G {}{}",
            money(p.current_value),
            signed_money(p.total_profit_loss),
            signed_percent(p.roi_percent),
            signed_money(p.daily_profit_loss),
            signed_percent(p.daily_roi_percent),
            money(p.kalshi_balance + p.kalshi_positions_value),
            money(p.crypto_balance + p.crypto_positions_value),
            money(p.grid_balance + p.grid_positions_value),
            stale_suffix(resource)
        )),
        (None, Some(e)) => Some(format!("💼 Portfolio unavailable: {}", e.message)),
        (None, None) => None,
    }
}

fn bot_state(bot: &BotStatus) -> &'static str {
    if bot.error_message.is_some() {
        "❌"
    } else if bot.is_paused {
        "⏸"
    } else if bot.is_running {
        "▶"
    } else {
        "⏹"
    }
}

pub fn format_bots_line(resource: &Resource<Vec<BotStatus>>) -> Option<String> {
    match (&resource.value, &resource.error) {
        (Some(bots), _) => {
            let parts: Vec<String> = bots
                .iter()
                .map(|bot| {
                    format!(
                        "{} {} {}t {}",
                        bot.name,
                        bot_state(bot),
                        bot.total_trades_today,
                        money(bot.capital)
                    )
                })
                .collect();
            Some(format!("🤖 {}{}", parts.join(" | "), stale_suffix(resource)))
        }
        (None, Some(e)) => Some(format!("🤖 Bot status unavailable: {}", e.message)),
        (None, None) => None,
    }
}

/// Multi-field status of one bot, for the `bots` listing.
pub fn format_bot_detail(bot: &BotStatus) -> String {
    let mut line = format!(
        "{} {:<6} | trades today {} (last cycle {}) | capital {} | positions {} | cycle {}ms",
        bot_state(bot),
        bot.name.as_str(),
        bot.total_trades_today,
        bot.last_trades_count,
        money(bot.capital),
        bot.positions_count,
        bot.last_cycle_duration_ms
    );
    if let Some(next) = bot.next_cycle_time {
        line.push_str(&format!(" | next {}", next.format("%H:%M:%S")));
    }
    if let Some(error) = &bot.error_message {
        line.push_str(&format!(" | error: {}", error));
    }
    line
}

pub fn format_transaction(tx: &Transaction) -> String {
    let pnl = match (tx.profit_loss, tx.profit_loss_percent) {
        (Some(pnl), Some(pct)) => format!("{} ({})", signed_money(pnl), signed_percent(pct)),
        (Some(pnl), None) => signed_money(pnl),
        _ => "open".to_string(),
    };
    format!(
        "{} {:<6} {:<5} {} x{} @ {} | {:?} | {}",
        tx.timestamp.format("%Y-%m-%d %H:%M"),
        tx.bot.as_str(),
        format!("{:?}", tx.side).to_uppercase(),
        tx.market_name,
        tx.quantity,
        money(tx.entry_price),
        tx.status,
        pnl
    )
}

pub fn format_log_entry(entry: &LogEntry) -> String {
    format!(
        "[{}] {:<8} {:<6} {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.level.as_str(),
        entry.bot.as_str(),
        entry.message
    )
}

/// Tracks which log lines were already printed across overlapping tail snapshots.
///
/// Lines sharing the newest printed timestamp are remembered whole, so a line
/// that arrives later with that same timestamp is still printed once.
#[derive(Debug, Default)]
pub struct LogCursor {
    last: Option<DateTime<Utc>>,
    at_last: Vec<LogEntry>,
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unseen entries, oldest first. They are marked seen.
    pub fn advance<'a>(&mut self, items: &'a [LogEntry]) -> Vec<&'a LogEntry> {
        // the backend sends newest first; reversing keeps same-second lines in order
        let mut fresh: Vec<&LogEntry> = items.iter().rev().filter(|entry| self.is_new(entry)).collect();
        fresh.sort_by_key(|entry| entry.timestamp);
        for entry in &fresh {
            if self.last == Some(entry.timestamp) {
                self.at_last.push((*entry).clone());
            } else {
                self.last = Some(entry.timestamp);
                self.at_last = vec![(*entry).clone()];
            }
        }
        fresh
    }

    fn is_new(&self, entry: &LogEntry) -> bool {
        match self.last {
            None => true,
            Some(last) => entry.timestamp > last || (entry.timestamp == last && !self.at_last.contains(entry)),
        }
    }
}

/// Owns the three live pollers for as long as the view is up.
pub struct DashboardMonitor {
    session: Arc<SessionGuard>,
    portfolio: PortfolioPoller,
    bots: BotsPoller,
    logs: LogsPoller,
}

impl DashboardMonitor {
    /// Mount every poller. Must be called inside a Tokio runtime.
    pub fn start(client: ApiClient, polling: &PollingSettings, log_query: LogQuery) -> Self {
        let session = client.session().clone();
        let portfolio = SnapshotPoller::portfolio(client.clone(), polling.portfolio_interval);
        let bots = SnapshotPoller::bots(client.clone(), polling.bots_interval);
        let logs = LogsPoller::new(client, polling.logs_interval);
        logs.start_polling(log_query);
        Self {
            session,
            portfolio,
            bots,
            logs,
        }
    }

    pub fn portfolio(&self) -> &PortfolioPoller {
        &self.portfolio
    }

    pub fn bots(&self) -> &BotsPoller {
        &self.bots
    }

    pub fn logs(&self) -> &LogsPoller {
        &self.logs
    }

    /// Print every settled update until `shutdown` resolves or the session ends.
    /// All pollers are stopped before returning.
    pub async fn run<F>(&self, shutdown: F) -> MonitorExit
    where
        F: Future<Output = ()>,
    {
        let mut session_rx = self.session.subscribe();
        let mut portfolio_rx = self.portfolio.subscribe();
        let mut bots_rx = self.bots.subscribe();
        let mut logs_rx = self.logs.subscribe();
        let mut log_cursor = LogCursor::new();
        tokio::pin!(shutdown);

        let exit = loop {
            {
                let session = session_rx.borrow_and_update();
                if session.status == SessionStatus::Unauthenticated {
                    break MonitorExit::SessionEnded(session.last_error.clone());
                }
            }

            tokio::select! {
                _ = &mut shutdown => break MonitorExit::Shutdown,
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        break MonitorExit::Shutdown;
                    }
                }
                changed = portfolio_rx.changed() => {
                    if changed.is_err() {
                        break MonitorExit::Shutdown;
                    }
                    let resource = portfolio_rx.borrow_and_update().clone();
                    if settled(&resource) {
                        if let Some(line) = format_portfolio_line(&resource) {
                            println!("{}", line);
                            crate::log_dashboard_event(&line);
                        }
                    }
                }
                changed = bots_rx.changed() => {
                    if changed.is_err() {
                        break MonitorExit::Shutdown;
                    }
                    let resource = bots_rx.borrow_and_update().clone();
                    if settled(&resource) {
                        if let Some(line) = format_bots_line(&resource) {
                            println!("{}", line);
                        }
                    }
                }
                changed = logs_rx.changed() => {
                    if changed.is_err() {
                        break MonitorExit::Shutdown;
                    }
                    let resource: Resource<LogTail> = logs_rx.borrow_and_update().clone();
                    if !settled(&resource) {
                        continue;
                    }
                    if let Some(tail) = &resource.value {
                        for entry in log_cursor.advance(&tail.items) {
                            println!("{}", format_log_entry(entry));
                        }
                    }
                    if let Some(e) = &resource.error {
                        println!("📜 Logs unavailable: {}", e.message);
                    }
                }
            }
        };

        self.stop();
        match &exit {
            MonitorExit::Shutdown => info!("Monitor stopped"),
            MonitorExit::SessionEnded(reason) => warn!(
                "🔒 Monitor stopped: session ended{}",
                reason.as_deref().map(|r| format!(" ({})", r)).unwrap_or_default()
            ),
        }
        exit
    }

    /// Stop all timers. Idempotent.
    pub fn stop(&self) {
        self.portfolio.stop();
        self.bots.stop();
        self.logs.stop_polling();
    }
}

impl Drop for DashboardMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::models::{BotName, LogLevel, LogSource, TradeSide, TransactionStatus};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn summary() -> PortfolioSummary {
        PortfolioSummary {
            total_capital: dec!(500),
            current_value: dec!(550),
            total_profit_loss: dec!(50),
            roi_percent: dec!(10),
            daily_profit_loss: dec!(-5.5),
            daily_roi_percent: dec!(-1),
            kalshi_balance: dec!(100),
            kalshi_positions_value: dec!(20.5),
            crypto_balance: dec!(200),
            crypto_positions_value: dec!(30),
            grid_balance: dec!(150),
            grid_positions_value: dec!(49.5),
            last_updated: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    fn ready<T>(value: Option<T>, error: Option<ApiError>) -> Resource<T> {
        Resource {
            value,
            is_loading: false,
            phase: if error.is_some() { Phase::Errored } else { Phase::Ready },
            error,
        }
    }

    fn log(second: u32, message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, second).unwrap(),
            bot: LogSource::Kalshi,
            level: LogLevel::Error,
            message: message.to_string(),
            module: None,
            function: None,
        }
    }

    #[test]
    fn portfolio_line_shows_signed_figures() {
        let line = format_portfolio_line(&ready(Some(summary()), None)).unwrap();
        assert_eq!(
            line,
            "💼 Value $550.00 | P&L +$50.00 (+10.00%) | Today -$5.50 (-1.00%) | K $120.50 C $230.00 G $199.50"
        );
    }

    #[test]
    fn failed_refresh_keeps_stale_value_with_inline_error() {
        let line = format_portfolio_line(&ready(Some(summary()), Some(ApiError::network("timeout")))).unwrap();
        assert!(line.starts_with("💼 Value $550.00"));
        assert!(line.ends_with("stale: API request failed: timeout"));

        let first_load = format_portfolio_line(&ready(None, Some(ApiError::network("timeout")))).unwrap();
        assert_eq!(first_load, "💼 Portfolio unavailable: API request failed: timeout");
        assert!(format_portfolio_line(&Resource::<PortfolioSummary>::idle(true)).is_none());
    }

    #[test]
    fn bots_line_marks_paused_and_failing_bots() {
        let bot = |name, is_paused, error: Option<&str>| BotStatus {
            name,
            is_running: true,
            is_paused,
            last_cycle_time: None,
            last_cycle_duration_ms: 120,
            last_trades_count: 1,
            total_trades_today: 4,
            error_message: error.map(str::to_string),
            next_cycle_time: None,
            capital: dec!(100),
            positions_count: 2,
        };
        let bots = vec![
            bot(BotName::Kalshi, false, None),
            bot(BotName::Crypto, true, None),
            bot(BotName::Grid, false, Some("exchange down")),
        ];
        assert_eq!(
            format_bots_line(&ready(Some(bots), None)).unwrap(),
            "🤖 kalshi ▶ 4t $100.00 | crypto ⏸ 4t $100.00 | grid ❌ 4t $100.00"
        );
    }

    #[test]
    fn transaction_line_shows_pnl_or_open() {
        let mut tx = Transaction {
            id: "t1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 14, 5, 0).unwrap(),
            bot: BotName::Kalshi,
            market_id: "FED-24MAR".to_string(),
            market_name: "Fed holds rates".to_string(),
            side: TradeSide::Yes,
            quantity: dec!(10),
            entry_price: dec!(0.42),
            exit_price: None,
            profit_loss: None,
            profit_loss_percent: None,
            status: TransactionStatus::Open,
            notes: None,
        };
        assert_eq!(
            format_transaction(&tx),
            "2024-03-01 14:05 kalshi YES   Fed holds rates x10 @ $0.42 | Open | open"
        );

        tx.profit_loss = Some(dec!(-1.2));
        tx.profit_loss_percent = Some(dec!(-28.57));
        tx.status = TransactionStatus::Closed;
        assert!(format_transaction(&tx).ends_with("| Closed | -$1.20 (-28.57%)"));
    }

    #[test]
    fn only_unseen_log_lines_are_printed_oldest_first() {
        let mut cursor = LogCursor::new();
        let items = vec![log(2, "second"), log(1, "first")];
        let all: Vec<&str> = cursor.advance(&items).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(all, vec!["first", "second"]);

        let items = vec![log(3, "third"), log(2, "second"), log(1, "first")];
        let newer: Vec<&str> = cursor.advance(&items).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(newer, vec!["third"]);
        assert!(cursor.advance(&items).is_empty());
    }

    #[test]
    fn late_line_with_the_same_timestamp_is_still_printed() {
        let mut cursor = LogCursor::new();
        let first = vec![log(5, "order placed")];
        assert_eq!(cursor.advance(&first).len(), 1);

        let second = vec![log(5, "order filled"), log(5, "order placed"), log(4, "quote")];
        let newer: Vec<&str> = cursor.advance(&second).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(newer, vec!["order filled"]);

        let third = vec![log(6, "cycle done"), log(5, "order filled"), log(5, "order placed")];
        let newer: Vec<&str> = cursor.advance(&third).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(newer, vec!["cycle done"]);
    }

    #[test]
    fn log_line_is_aligned() {
        assert_eq!(format_log_entry(&log(7, "order timeout")), "[09:00:07] ERROR    kalshi order timeout");
    }
}
