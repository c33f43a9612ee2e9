// Main entry point for the trading dashboard monitor

use anyhow::{Context, Result};
use reqwest::Url;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use trading_dashboard_client::config::{CliConfig, Command, DashboardSettings};
use trading_dashboard_client::monitor::{
    format_bot_detail, format_log_entry, format_transaction, DashboardMonitor, LogCursor, MonitorExit,
};
use trading_dashboard_client::{
    init_history_file, log_dashboard_event, ActionInvoker, ApiClient, BotAction, ConsoleNavigator, CredentialStore,
    FileStore, LogQuery, LogsPoller, ReqwestTransport, SessionGuard, TransactionsPoller, Transport,
};

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Exit with a hint when no session could be established.
fn require_session(session: &SessionGuard) {
    if session.is_authenticated() {
        return;
    }
    let reason = session
        .snapshot()
        .last_error
        .map(|e| format!(" ({})", e))
        .unwrap_or_default();
    eprintln!("🔒 Not signed in{}. Run `dashboard-monitor login` first.", reason);
    std::process::exit(1);
}

fn fail(message: &str) -> ! {
    eprintln!("❌ {}", message);
    std::process::exit(1);
}

fn build_transport(settings: &DashboardSettings) -> Result<ReqwestTransport> {
    let transport = match &settings.edge_cookie {
        Some(cookie) => ReqwestTransport::with_edge_cookie(settings.request_timeout, &settings.api_url, cookie),
        None => ReqwestTransport::new(settings.request_timeout),
    };
    transport.context("Failed to build HTTP client")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let config = <CliConfig as clap::Parser>::parse();

    // Initialize logging (tracing to stderr, RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = match config.settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("❌ Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.validate() {
        error!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }

    // Open the history file for append and initialize global history logger
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.history_file)
        .with_context(|| format!("Failed to open history file {}", settings.history_file.display()))?;
    init_history_file(log_file);

    let command = config.command();
    info!("🚀 Starting dashboard monitor");
    info!(
        "Backend: {} | auth: {:?} | command: {:?}",
        settings.api_url, settings.auth.mode, command
    );
    log_dashboard_event(&format!(
        "CLIENT START | api_url={} | auth={:?} | command={:?}",
        settings.api_url, settings.auth.mode, command
    ));

    let transport: Arc<dyn Transport> = Arc::new(build_transport(&settings)?);
    let store: Arc<dyn CredentialStore> = Arc::new(FileStore::new(settings.state_file.clone()));
    let session = Arc::new(SessionGuard::new(
        settings.api_url.clone(),
        settings.auth.clone(),
        transport.clone(),
        store,
        Arc::new(ConsoleNavigator),
    ));
    let client = ApiClient::new(settings.api_url.clone(), transport, session.clone());

    match command {
        Command::Login { callback: Some(raw) } => {
            let mut location = Url::parse(&raw).with_context(|| format!("Invalid callback URL '{}'", raw))?;
            let result = session.initialize(Some(&mut location)).await;
            match (&result.identity, result.is_authenticated()) {
                (Some(identity), true) => {
                    println!("✅ Logged in as {}", identity.display_name);
                    println!("   Continue at: {}", location);
                }
                _ => fail(&result.last_error.unwrap_or_else(|| "Login did not complete".to_string())),
            }
        }
        Command::Login { callback: None } => {
            let result = session.initialize(None).await;
            match (&result.identity, result.is_authenticated()) {
                (Some(identity), true) => println!("✅ Already logged in as {}", identity.display_name),
                _ => session.login(),
            }
        }
        Command::Logout => {
            session.initialize(None).await;
            session.logout().await;
            println!("👋 Logged out");
        }
        Command::Whoami => {
            session.initialize(None).await;
            require_session(&session);
            if let Some(identity) = session.refresh_identity().await.or_else(|| session.identity()) {
                println!("👤 {} (id {})", identity.display_name, identity.id);
                if let Some(avatar) = &identity.avatar_url {
                    println!("   avatar: {}", avatar);
                }
                if let Some(last_login) = identity.last_login {
                    println!("   last login: {}", last_login.to_rfc3339());
                }
            }
        }
        Command::Transactions { page, bot, search } => {
            session.initialize(None).await;
            require_session(&session);
            let poller = TransactionsPoller::new(client, settings.polling.page_size);
            poller.fetch(page, bot, search.as_deref()).await;
            let resource = poller.snapshot();
            if let Some(error) = resource.error {
                fail(&error.message);
            }
            if let Some(list) = resource.value {
                for tx in &list.items {
                    println!("{}", format_transaction(tx));
                }
                println!(
                    "📄 Page {} | {} of {} transactions{}",
                    list.page,
                    list.items.len(),
                    list.total,
                    if list.has_more { " | more available" } else { "" }
                );
            }
        }
        Command::Logs {
            bot,
            level,
            search,
            limit,
            follow,
        } => {
            session.initialize(None).await;
            require_session(&session);
            let query = LogQuery {
                bot,
                level,
                search,
                limit: limit.unwrap_or(settings.polling.log_limit),
            };
            let poller = LogsPoller::new(client, settings.polling.logs_interval);
            if follow {
                let mut updates = poller.subscribe();
                let mut cursor = LogCursor::new();
                poller.start_polling(query);
                let shutdown = ctrl_c();
                tokio::pin!(shutdown);
                loop {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        changed = updates.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let resource = updates.borrow_and_update().clone();
                            if resource.is_loading {
                                continue;
                            }
                            if let Some(tail) = &resource.value {
                                for entry in cursor.advance(&tail.items) {
                                    println!("{}", format_log_entry(entry));
                                }
                            }
                            if let Some(error) = &resource.error {
                                eprintln!("⚠️  {}", error.message);
                            }
                        }
                    }
                    if !session.is_authenticated() {
                        break;
                    }
                }
                poller.stop_polling();
            } else {
                poller.fetch(&query).await;
                let resource = poller.snapshot();
                if let Some(error) = resource.error {
                    fail(&error.message);
                }
                if let Some(tail) = resource.value {
                    for entry in LogCursor::new().advance(&tail.items) {
                        println!("{}", format_log_entry(entry));
                    }
                }
            }
        }
        Command::Bots => {
            session.initialize(None).await;
            require_session(&session);
            match client.bots().await {
                Ok(bots) => bots.iter().for_each(|bot| println!("{}", format_bot_detail(bot))),
                Err(e) => fail(&e.message),
            }
        }
        Command::Bot { name, action } => {
            session.initialize(None).await;
            require_session(&session);
            let invoker = ActionInvoker::new(client);
            match action {
                BotAction::Scan => match invoker.scan(name).await {
                    Ok(scan) => println!(
                        "🔍 Scan {} on {}: {} markets, {} edges, {} pending analysis",
                        scan.scan_id, scan.bot, scan.markets_found, scan.edges_found, scan.pending_analysis
                    ),
                    Err(e) => fail(&e.message),
                },
                action => match invoker.bot_action(name, action).await {
                    Ok(_) => println!("✅ {} {} accepted", action, name),
                    Err(e) => fail(&e.message),
                },
            }
        }
        Command::Deploy => {
            session.initialize(None).await;
            require_session(&session);
            let invoker = ActionInvoker::new(client);
            match invoker.git_pull().await {
                Ok(result) if result.success => {
                    println!("🚀 {} ({} changes)", result.message, result.changes_count)
                }
                Ok(result) => fail(&result.message),
                Err(e) => fail(&e.message),
            }
        }
        Command::Watch => {
            session.initialize(None).await;
            require_session(&session);
            println!("📡 Watching {} (Ctrl-C to stop)", settings.api_url);
            let monitor = DashboardMonitor::start(
                client,
                &settings.polling,
                LogQuery::new().limit(settings.polling.log_limit),
            );
            if let MonitorExit::SessionEnded(reason) = monitor.run(ctrl_c()).await {
                fail(&format!(
                    "Session ended{}. Run `dashboard-monitor login` again.",
                    reason.map(|r| format!(" ({})", r)).unwrap_or_default()
                ));
            }
        }
    }

    Ok(())
}
