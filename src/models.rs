// Wire models for the trading backend's REST API

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp helpers: the backend emits RFC 3339 or naive ISO-8601 (assumed UTC).
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match ts {
                Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) if raw.is_empty() => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw))),
            }
        }
    }
}

/// One of the three trading bots managed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotName {
    Kalshi,
    Crypto,
    Grid,
}

impl BotName {
    pub const ALL: [BotName; 3] = [BotName::Kalshi, BotName::Crypto, BotName::Grid];

    pub fn as_str(&self) -> &'static str {
        match self {
            BotName::Kalshi => "kalshi",
            BotName::Crypto => "crypto",
            BotName::Grid => "grid",
        }
    }
}

impl fmt::Display for BotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kalshi" => Ok(BotName::Kalshi),
            "crypto" => Ok(BotName::Crypto),
            "grid" => Ok(BotName::Grid),
            other => Err(format!("unknown bot '{}': expected kalshi, crypto or grid", other)),
        }
    }
}

/// Origin of a log line: a bot, or the backend itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Kalshi,
    Crypto,
    Grid,
    System,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Kalshi => "kalshi",
            LogSource::Crypto => "crypto",
            LogSource::Grid => "grid",
            LogSource::System => "system",
        }
    }
}

impl From<BotName> for LogSource {
    fn from(bot: BotName) -> Self {
        match bot {
            BotName::Kalshi => LogSource::Kalshi,
            BotName::Crypto => LogSource::Crypto,
            BotName::Grid => LogSource::Grid,
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(LogSource::System),
            other => BotName::from_str(other)
                .map(LogSource::from)
                .map_err(|_| format!("unknown log source '{}': expected kalshi, crypto, grid or system", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Yes,
    No,
    Buy,
    Sell,
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Open,
    Closed,
    Settled,
    Pending,
}

/// Display-oriented profile of the signed-in user.
///
/// Serialized with the backend's field names so the persisted copy round-trips
/// through the same decoder. Decoding also accepts the shape returned by an
/// edge proxy's whoami endpoint (`user_uuid`, `email`, `name`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    #[serde(rename = "github_username")]
    pub display_name: String,
    #[serde(rename = "github_avatar_url")]
    pub avatar_url: Option<String>,
    #[serde(serialize_with = "timestamp::option::serialize")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "timestamp::option::serialize")]
    pub last_login: Option<DateTime<Utc>>,
}

/// Every identity field name either backend flavour may send.
#[derive(Deserialize)]
struct IdentityWire {
    id: Option<String>,
    user_uuid: Option<String>,
    github_username: Option<String>,
    username: Option<String>,
    name: Option<String>,
    email: Option<String>,
    github_avatar_url: Option<String>,
    avatar_url: Option<String>,
    #[serde(default, with = "timestamp::option")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    last_login: Option<DateTime<Utc>>,
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        IdentityWire::deserialize(deserializer)?
            .into_identity()
            .map_err(serde::de::Error::custom)
    }
}

impl IdentityWire {
    fn into_identity(self) -> Result<Identity, String> {
        let id = self
            .id
            .or(self.user_uuid)
            .ok_or_else(|| "identity is missing an id".to_string())?;
        // first non-empty name wins, most specific first
        let display_name = [self.github_username, self.username, self.name, self.email]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty())
            .ok_or_else(|| "identity is missing a display name".to_string())?;
        Ok(Identity {
            id,
            display_name,
            avatar_url: self.github_avatar_url.or(self.avatar_url),
            created_at: self.created_at,
            last_login: self.last_login,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_capital: Decimal,
    pub current_value: Decimal,
    pub total_profit_loss: Decimal,
    pub roi_percent: Decimal,
    pub daily_profit_loss: Decimal,
    pub daily_roi_percent: Decimal,
    pub kalshi_balance: Decimal,
    pub kalshi_positions_value: Decimal,
    pub crypto_balance: Decimal,
    pub crypto_positions_value: Decimal,
    pub grid_balance: Decimal,
    pub grid_positions_value: Decimal,
    #[serde(with = "timestamp")]
    pub last_updated: DateTime<Utc>,
}

impl PortfolioSummary {
    /// Balance plus open position value for one bot.
    pub fn bot_value(&self, bot: BotName) -> Decimal {
        match bot {
            BotName::Kalshi => self.kalshi_balance + self.kalshi_positions_value,
            BotName::Crypto => self.crypto_balance + self.crypto_positions_value,
            BotName::Grid => self.grid_balance + self.grid_positions_value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub bot: BotName,
    pub market_id: String,
    pub market_name: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub exit_price: Option<Decimal>,
    #[serde(default)]
    pub profit_loss: Option<Decimal>,
    #[serde(default)]
    pub profit_loss_percent: Option<Decimal>,
    pub status: TransactionStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
    pub name: BotName,
    pub is_running: bool,
    pub is_paused: bool,
    #[serde(default, with = "timestamp::option")]
    pub last_cycle_time: Option<DateTime<Utc>>,
    pub last_cycle_duration_ms: u64,
    pub last_trades_count: u64,
    pub total_trades_today: u64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default, with = "timestamp::option")]
    pub next_cycle_time: Option<DateTime<Utc>>,
    pub capital: Decimal,
    pub positions_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub bot: LogSource,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
}

/// One page of a server-owned collection. Replaced wholesale on every fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    pub has_more: bool,
}

/// Log endpoint result: only the items are consumed, pagination fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTail {
    pub items: Vec<LogEntry>,
}

/// Result of a manually triggered market scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub bot: BotName,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub markets_found: u64,
    pub edges_found: u64,
    pub pending_analysis: u64,
}

/// Result of the git-pull deploy trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitPullResult {
    pub success: bool,
    pub message: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub changes_count: u64,
}

/// Acknowledgement body of pause/resume/restart. The shape is not fixed by the backend.
pub type ActionAck = serde_json::Value;
