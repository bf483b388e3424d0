//! Scripted browsing session that drives the whole marker pipeline in one
//! process: a simulated host, the coordinator, one agent per content tab,
//! and the settings surface. Prints the tab table after every step so the
//! marker churn is visible.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trail_agent::{AgentHandle, TabAgent};
use trail_coordinator::{Coordinator, CoordinatorConfig, SettingsSurface};
use trail_core::TabId;
use trail_host::{MessageFabric, SimHost, TabHost};
use trail_store::{SqliteStore, StorePair};

#[derive(Parser, Debug)]
#[command(
    name = "tabtrail",
    version,
    about = "Walk a scripted browser session through the recency-marker pipeline"
)]
struct Args {
    /// Markers to display, 1 through 4.
    #[arg(long, default_value_t = 4)]
    mode: usize,

    /// Directory for sqlite-backed stores. Wins over --persist.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep state in the platform data directory across runs.
    #[arg(long, default_value_t = false)]
    persist: bool,

    /// Re-broadcast the stack on this cadence, in seconds. 0 disables it.
    #[arg(long, default_value_t = 0)]
    reassert_secs: u64,

    /// Debug logging regardless of the stored diagnostics flag.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_stores(args: &Args) -> Result<StorePair> {
    let dir = match (&args.data_dir, args.persist) {
        (Some(dir), _) => dir.clone(),
        (None, true) => dirs::data_dir()
            .context("no platform data directory")?
            .join("tabtrail"),
        (None, false) => return Ok(StorePair::in_memory()),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating data directory {}", dir.display()))?;
    let local = SqliteStore::open(dir.join("state.db"))
        .with_context(|| format!("opening {}", dir.join("state.db").display()))?;
    let synced = SqliteStore::open(dir.join("settings.db"))
        .with_context(|| format!("opening {}", dir.join("settings.db").display()))?;
    Ok(StorePair::new(Arc::new(local), Arc::new(synced)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let stores = open_stores(&args)?;
    init_logging(args.debug || stores.local.diagnostics_enabled());

    let host = Arc::new(SimHost::new());
    let fabric = MessageFabric::new();
    let settings = SettingsSurface::new(host.clone(), fabric.clone(), stores.clone());
    let mode = settings.set_display_mode(args.mode).await?;
    let persistent = args.data_dir.is_some() || args.persist;
    info!(event = "session_starting", tracked = mode.tracked(), persistent);

    run_session(host, fabric, stores, settings, &args).await
}

async fn run_session(
    host: Arc<SimHost>,
    fabric: MessageFabric,
    stores: StorePair,
    settings: SettingsSurface,
    args: &Args,
) -> Result<()> {
    let window = host.open_window();
    let pages = [
        ("https://mail.example/inbox", "Inbox"),
        ("https://docs.example/runbook", "Incident runbook"),
        ("https://tracker.example/board", "Sprint board"),
        ("https://wiki.example/oncall", "On-call handbook"),
        ("https://news.example/", "Morning digest"),
    ];
    let mut tabs = Vec::new();
    for (url, title) in pages {
        tabs.push(host.open_tab(window, url, title)?);
    }
    // Privileged page: never tracked, never reloaded, runs no agent.
    host.open_background_tab(window, "about:flags", "Experiments")?;

    let mut agents = Vec::new();
    for &tab in &tabs {
        agents.push(attach_agent(&host, &fabric, &stores, tab).await?);
    }

    let config = CoordinatorConfig {
        reassert_interval: (args.reassert_secs > 0)
            .then(|| Duration::from_secs(args.reassert_secs)),
    };
    let coordinator =
        Coordinator::with_config(host.clone(), fabric.clone(), stores.clone(), config.clone());
    let handle = coordinator.spawn().await;

    for &tab in &tabs {
        host.activate(tab)?;
        settle().await;
    }
    print_table("after the first pass through every tab", &host, &fabric).await;

    let runbook = tabs[1];
    host.activate(runbook)?;
    settle().await;
    host.write_title(runbook, "Incident runbook (resolved)")?;
    settle().await;
    print_table("after returning to the retitled runbook", &host, &fabric).await;

    host.close(runbook)?;
    settle().await;
    print_table("after closing the active runbook", &host, &fabric).await;

    settings.set_display_mode(2).await?;
    settle().await;
    print_table("after narrowing to two markers", &host, &fabric).await;

    handle.stop().await;
    let handle = Coordinator::with_config(host.clone(), fabric.clone(), stores.clone(), config)
        .spawn()
        .await;
    settle().await;
    print_table("after restarting the coordinator", &host, &fabric).await;

    let board = tabs[2];
    host.activate(board)?;
    settle().await;
    host.navigate(board, "https://tracker.example/board/review", "Deploy review")?;
    agents.push(attach_agent(&host, &fabric, &stores, board).await?);
    settle().await;
    print_table("after the board navigates and its agent reattaches", &host, &fabric).await;

    fabric.invalidate().await;
    handle.stop().await;
    for agent in agents {
        agent.join().await;
    }
    let reloaded = settings.reload_eligible_tabs();
    println!("\nreload sweep touched {reloaded} tabs");
    print_table("after the runtime goes away", &host, &fabric).await;

    Ok(())
}

async fn attach_agent(
    host: &Arc<SimHost>,
    fabric: &MessageFabric,
    stores: &StorePair,
    tab: TabId,
) -> Result<AgentHandle> {
    let doc = host
        .document(tab)
        .with_context(|| format!("attaching an agent to tab {tab}"))?;
    Ok(TabAgent::spawn(tab, Box::new(doc), fabric.clone(), stores.synced.clone()).await)
}

/// One beat for the event fan-out and the agents' title writes to land.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn print_table(label: &str, host: &SimHost, fabric: &MessageFabric) {
    let mut order: Option<Vec<TabId>> = None;
    let mut rows = Vec::new();
    for snapshot in host.all_tabs() {
        let position = match fabric.query_position(snapshot.id).await {
            Ok(reply) if reply.success => {
                if order.is_none() {
                    order = Some(reply.stack_snapshot.clone());
                }
                reply.position
            }
            _ => 0,
        };
        rows.push((position, snapshot));
    }
    rows.sort_by_key(|(position, snapshot)| {
        (
            if *position == 0 { usize::MAX } else { *position },
            snapshot.id,
        )
    });

    println!("\n== {label}");
    if let Some(order) = order {
        let chain: Vec<String> = order.iter().map(ToString::to_string).collect();
        println!("   stack: [{}]", chain.join(" > "));
    }
    for (position, snapshot) in rows {
        let slot = if position == 0 {
            "-".to_string()
        } else {
            position.to_string()
        };
        let active = if snapshot.active { "*" } else { " " };
        println!("  {slot:>2} {active} [{}] {}", snapshot.id, snapshot.title);
    }
}
