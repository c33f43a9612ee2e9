// Configuration: CLI flags, optional JSON file and environment

use crate::invoker::BotAction;
use crate::models::{BotName, LogLevel, LogSource};
use crate::pollers::{BOTS_INTERVAL, DEFAULT_LOG_LIMIT, DEFAULT_PAGE_SIZE, LOGS_INTERVAL, PORTFOLIO_INTERVAL};
use crate::session::{AuthMode, AuthSettings};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_STATE_FILE: &str = ".dashboard-session.json";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const API_URL_ENV: &str = "DASHBOARD_API_URL";
pub const AUTH_MODE_ENV: &str = "DASHBOARD_AUTH_MODE";
pub const EDGE_COOKIE_ENV: &str = "DASHBOARD_EDGE_COOKIE";

/// CLI Configuration
#[derive(Parser, Debug)]
#[command(name = "dashboard-monitor")]
#[command(about = "Terminal monitor and control client for the trading bots dashboard backend")]
pub struct CliConfig {
    /// Backend base URL (can also use DASHBOARD_API_URL env var)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Credential model: bearer or edge-cookie (can also use DASHBOARD_AUTH_MODE env var)
    #[arg(long, global = true)]
    pub auth_mode: Option<String>,

    /// Edge-issued session cookie as name=value (edge-cookie mode only)
    #[arg(long, global = true)]
    pub edge_cookie: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Portfolio refresh interval in seconds
    #[arg(long, global = true)]
    pub portfolio_interval_secs: Option<u64>,

    /// Bot status refresh interval in seconds
    #[arg(long, global = true)]
    pub bots_interval_secs: Option<u64>,

    /// Log tail refresh interval in seconds
    #[arg(long, global = true)]
    pub logs_interval_secs: Option<u64>,

    /// Transactions per page
    #[arg(long, global = true)]
    pub page_size: Option<u32>,

    /// Where the bearer token and identity are kept between runs
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Append-only activity history
    #[arg(long, global = true, default_value = "dashboard-history.log")]
    pub history_file: PathBuf,

    /// Configuration file path (JSON format)
    #[arg(long, global = true, default_value = "dashboard.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Live portfolio, bot status and log monitor (default)
    Watch,
    /// Start the login flow, or complete it from the callback URL
    Login {
        /// URL the login provider redirected to (carries token and user)
        #[arg(long)]
        callback: Option<String>,
    },
    Logout,
    /// Show the signed-in identity
    Whoami,
    /// One page of transaction history
    Transactions {
        /// Zero-based page index
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long)]
        bot: Option<BotName>,
        /// Substring match on the market name
        #[arg(long)]
        search: Option<String>,
    },
    /// Most recent log lines
    Logs {
        #[arg(long)]
        bot: Option<LogSource>,
        #[arg(long)]
        level: Option<LogLevel>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        /// Keep refreshing until Ctrl-C
        #[arg(long)]
        follow: bool,
    },
    /// Status of every bot
    Bots,
    /// Pause, resume, restart or scan one bot
    Bot { name: BotName, action: BotAction },
    /// Pull the latest backend code and restart the bots
    Deploy,
}

/// JSON configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonConfig {
    pub api: Option<ApiJson>,
    pub polling: Option<PollingJson>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiJson {
    pub base_url: Option<String>,
    pub auth_mode: Option<String>,
    pub edge_cookie: Option<String>,
    pub timeout_secs: Option<u64>,
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollingJson {
    pub portfolio_interval_secs: Option<u64>,
    pub bots_interval_secs: Option<u64>,
    pub logs_interval_secs: Option<u64>,
    pub page_size: Option<u32>,
    pub log_limit: Option<u32>,
}

/// Cadences and result sizes of the pollers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingSettings {
    pub portfolio_interval: Duration,
    pub bots_interval: Duration,
    pub logs_interval: Duration,
    pub page_size: u32,
    pub log_limit: u32,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            portfolio_interval: PORTFOLIO_INTERVAL,
            bots_interval: BOTS_INTERVAL,
            logs_interval: LOGS_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
            log_limit: DEFAULT_LOG_LIMIT,
        }
    }
}

/// Fully resolved settings the binary runs with.
#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub api_url: Url,
    pub auth: AuthSettings,
    pub edge_cookie: Option<String>,
    pub request_timeout: Duration,
    pub polling: PollingSettings,
    pub state_file: PathBuf,
    pub history_file: PathBuf,
}

impl DashboardSettings {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.api_url.scheme(), "http" | "https") {
            return Err(format!("API URL must be http or https, got {}", self.api_url));
        }
        if self.request_timeout.is_zero() {
            return Err("Request timeout must be greater than zero".to_string());
        }
        let intervals = [
            ("portfolio", self.polling.portfolio_interval),
            ("bot status", self.polling.bots_interval),
            ("logs", self.polling.logs_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(format!("The {} interval must be greater than zero", name));
            }
        }
        if self.polling.page_size == 0 {
            return Err("Page size must be greater than zero".to_string());
        }
        if self.polling.log_limit == 0 {
            return Err("Log limit must be greater than zero".to_string());
        }
        if let Some(cookie) = &self.edge_cookie {
            if self.auth.mode != AuthMode::EdgeCookie {
                return Err("An edge cookie is only used with --auth-mode edge-cookie".to_string());
            }
            let name = cookie.split_once('=').map(|(name, _)| name.trim()).unwrap_or("");
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(format!("Edge cookie must look like name=value, got '{}'", cookie));
            }
        }
        Ok(())
    }
}

impl CliConfig {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Watch)
    }

    /// Load configuration from JSON file
    pub fn load_json_config(&self) -> Result<JsonConfig> {
        let config_path = &self.config;

        if !config_path.exists() {
            return Ok(JsonConfig::default());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))
    }

    /// Resolve every setting from CLI arg, config file, environment variable or default (in that order)
    pub fn settings(&self) -> Result<DashboardSettings> {
        let json = self.load_json_config()?;
        self.resolve(&json, |key| std::env::var(key).ok())
    }

    fn resolve<E>(&self, json: &JsonConfig, env: E) -> Result<DashboardSettings>
    where
        E: Fn(&str) -> Option<String>,
    {
        let api = json.api.clone().unwrap_or_default();
        let polling = json.polling.clone().unwrap_or_default();
        let defaults = PollingSettings::default();

        let raw_url = self
            .api_url
            .clone()
            .or(api.base_url)
            .or_else(|| env(API_URL_ENV))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = Url::parse(&raw_url).with_context(|| format!("Invalid API URL '{}'", raw_url))?;

        let mode = match self.auth_mode.clone().or(api.auth_mode).or_else(|| env(AUTH_MODE_ENV)) {
            Some(raw) => raw.parse::<AuthMode>().map_err(anyhow::Error::msg)?,
            None => AuthMode::Bearer,
        };

        let edge_cookie = self
            .edge_cookie
            .clone()
            .or(api.edge_cookie)
            .or_else(|| env(EDGE_COOKIE_ENV))
            .filter(|c| !c.trim().is_empty());

        let secs = |cli: Option<u64>, file: Option<u64>, default: Duration| {
            cli.or(file).map(Duration::from_secs).unwrap_or(default)
        };

        Ok(DashboardSettings {
            api_url,
            auth: AuthSettings::for_mode(mode),
            edge_cookie,
            request_timeout: secs(self.timeout_secs, api.timeout_secs, DEFAULT_REQUEST_TIMEOUT),
            polling: PollingSettings {
                portfolio_interval: secs(
                    self.portfolio_interval_secs,
                    polling.portfolio_interval_secs,
                    defaults.portfolio_interval,
                ),
                bots_interval: secs(self.bots_interval_secs, polling.bots_interval_secs, defaults.bots_interval),
                logs_interval: secs(self.logs_interval_secs, polling.logs_interval_secs, defaults.logs_interval),
                page_size: self.page_size.or(polling.page_size).unwrap_or(defaults.page_size),
                log_limit: polling.log_limit.unwrap_or(defaults.log_limit),
            },
            state_file: self
                .state_file
                .clone()
                .or(api.state_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            history_file: self.history_file.clone(),
        })
    }
}
