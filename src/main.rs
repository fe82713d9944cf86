//! chat-reconcile command line
//!
//! - `replay` plays a scenario file against in-memory services and prints
//!   the reconciled timeline
//! - `listen` follows one room on a live TCP endpoint

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use crossbeam_channel::{unbounded, Sender};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use chat_reconcile::backend::{
    run_backend, ChannelTransport, MemoryHistory, MemorySender, ScriptedSend, Services,
    TcpTransport,
};
use chat_reconcile::config::{load_settings, Settings};
use chat_reconcile::error::FetchError;
use chat_reconcile::events::process_events;
use chat_reconcile::logging;
use chat_reconcile::message::{Message, MessageStatus};
use chat_reconcile::protocol::EngineAction;
use chat_reconcile::state::{ClientState, ConnectionStatus};

const TICK: Duration = Duration::from_millis(10);

#[derive(Parser)]
#[command(name = "chat-reconcile", version, about = "Chat timeline reconciliation engine")]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file and print the final timeline
    Replay {
        scenario: PathBuf,

        /// Override the scenario's own user id
        #[arg(long)]
        own_user: Option<String>,
    },
    /// Follow a room on a live endpoint
    Listen {
        /// host:port, or "-" for `live_endpoint` from settings
        addr: String,

        room: String,

        #[arg(long, default_value = "me")]
        own_user: String,
    },
}

#[derive(Debug, Deserialize)]
struct Scenario {
    room: String,
    #[serde(default = "default_own_user")]
    own_user: String,
    #[serde(default)]
    history: Vec<Value>,
    #[serde(default)]
    history_error: Option<String>,
    #[serde(default)]
    live: Vec<LiveStep>,
    #[serde(default)]
    sends: Vec<SendStep>,
    /// How long to keep the session running after the last step
    #[serde(default = "default_settle_ms")]
    settle_ms: u64,
}

#[derive(Debug, Deserialize)]
struct LiveStep {
    at_ms: u64,
    message: Value,
}

#[derive(Debug, Deserialize)]
struct SendStep {
    at_ms: u64,
    text: String,
    #[serde(default)]
    outcome: Outcome,
    #[serde(default)]
    delay_ms: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Outcome {
    #[default]
    Ok,
    Fail,
}

fn default_own_user() -> String {
    "me".to_string()
}

fn default_settle_ms() -> u64 {
    3000
}

enum Step {
    Live(Value),
    Send(String),
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref()).context("failed to load settings")?;

    match cli.command {
        Commands::Replay {
            scenario,
            own_user,
        } => replay(&scenario, own_user, &settings),
        Commands::Listen {
            addr,
            room,
            own_user,
        } => {
            let addr = if addr == "-" {
                settings
                    .live_endpoint
                    .clone()
                    .context("no live_endpoint in settings")?
            } else {
                addr
            };
            listen(addr, &room, own_user, &settings)
        }
    }
}

fn replay(path: &Path, own_user: Option<String>, settings: &Settings) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("invalid scenario {}", path.display()))?;
    let config = settings.engine_config();

    let history = match scenario.history_error {
        Some(ref err) => MemoryHistory::new()
            .with_failure(&scenario.room, FetchError::Request(err.clone())),
        None => MemoryHistory::new().with_room(&scenario.room, scenario.history.clone()),
    };

    let mut sends: Vec<&SendStep> = scenario.sends.iter().collect();
    sends.sort_by_key(|s| s.at_ms);
    let sender = MemorySender::scripted(sends.iter().map(|s| {
        let delay = Duration::from_millis(s.delay_ms);
        match s.outcome {
            Outcome::Ok => ScriptedSend::ok_after(delay),
            Outcome::Fail => ScriptedSend::fail_after(delay, "rejected by scenario"),
        }
    }));

    let (transport, feed) = ChannelTransport::new();
    let (action_tx, action_rx) = unbounded();
    let (event_tx, event_rx) = unbounded();
    let services = Services {
        history: Arc::new(history),
        sender: Arc::new(sender),
        live: Box::new(transport),
    };
    let backend = thread::spawn(move || run_backend(action_rx, event_tx, services, config));

    let mut state = ClientState::new(own_user.unwrap_or(scenario.own_user), config);
    let enter = state
        .enter_room(&scenario.room)
        .context("invalid room in scenario")?;
    dispatch(&action_tx, enter)?;

    let mut steps: Vec<(u64, Step)> = scenario
        .live
        .iter()
        .map(|l| (l.at_ms, Step::Live(l.message.clone())))
        .chain(sends.iter().map(|s| (s.at_ms, Step::Send(s.text.clone()))))
        .collect();
    steps.sort_by_key(|(at, _)| *at);
    let end_ms = steps.last().map_or(0, |(at, _)| *at) + scenario.settle_ms;

    let start = Instant::now();
    let mut pending = steps.into_iter().peekable();
    while start.elapsed() < Duration::from_millis(end_ms) {
        process_events(&event_rx, &mut state);
        let elapsed = start.elapsed().as_millis() as u64;
        while let Some((_, step)) = pending.next_if(|(at, _)| *at <= elapsed) {
            match step {
                Step::Live(payload) => feed.push(scenario.room.clone(), stamp_if_missing(payload)),
                Step::Send(text) => match state.submit_to(&scenario.room, text, None) {
                    Ok(action) => dispatch(&action_tx, action)?,
                    Err(e) => warn!(error = %e, "scenario send rejected"),
                },
            }
        }
        thread::sleep(TICK);
    }

    dispatch(&action_tx, EngineAction::Shutdown)?;
    if backend.join().is_err() {
        bail!("backend thread panicked");
    }
    process_events(&event_rx, &mut state);

    let room = state
        .room_mut(&scenario.room)
        .context("room closed during replay")?;
    if let Some(banner) = &room.banner {
        println!("! {}", banner);
    }
    for msg in room.messages() {
        println!("{}", format_message(msg));
    }
    for (text, _) in &state.status_messages {
        info!(status = %text, "replay status");
    }
    Ok(())
}

fn listen(addr: String, room_id: &str, own_user: String, settings: &Settings) -> Result<()> {
    let config = settings.engine_config();
    let (action_tx, action_rx) = unbounded();
    let (event_tx, event_rx) = unbounded();
    let services = Services {
        history: Arc::new(MemoryHistory::new()),
        sender: Arc::new(MemorySender::new()),
        live: Box::new(TcpTransport::new(addr.clone())),
    };
    let backend = thread::spawn(move || run_backend(action_rx, event_tx, services, config));

    let mut state = ClientState::new(own_user, config);
    dispatch(&action_tx, state.enter_room(room_id)?)?;
    info!(%addr, %room_id, "listening");

    let mut printed: HashSet<String> = HashSet::new();
    let mut last_status = ConnectionStatus::Disconnected;
    let mut toasts_seen = 0;
    loop {
        process_events(&event_rx, &mut state);
        for (text, _) in state.status_messages.iter().skip(toasts_seen) {
            eprintln!("* {}", text);
        }
        state.purge_old_status_messages();
        toasts_seen = state.status_messages.len();
        if state.connection != last_status {
            last_status = state.connection.clone();
            match &last_status {
                ConnectionStatus::Connected => eprintln!("* connected to {}", addr),
                ConnectionStatus::Reconnecting(reason) => eprintln!("* reconnecting: {}", reason),
                ConnectionStatus::Disconnected => break,
            }
        }
        if let Some(room) = state.room_mut(room_id) {
            for msg in room.messages() {
                if printed.insert(msg.id.clone()) {
                    println!("{}", format_message(msg));
                }
            }
        }
        if backend.is_finished() {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

/// Live steps without a timestamp are stamped at delivery time, so a
/// scenario can echo its own sends.
fn stamp_if_missing(mut payload: Value) -> Value {
    if let Some(obj) = payload.as_object_mut() {
        if !["created_at", "createdAt", "timestamp"]
            .iter()
            .any(|k| obj.contains_key(*k))
        {
            obj.insert("created_at".into(), Value::String(Utc::now().to_rfc3339()));
        }
    }
    payload
}

fn dispatch(action_tx: &Sender<EngineAction>, action: EngineAction) -> Result<()> {
    action_tx
        .send(action)
        .context("backend thread is no longer running")
}

fn format_message(msg: &Message) -> String {
    let marker = match msg.status {
        MessageStatus::Sent => "",
        MessageStatus::Sending => " (sending)",
        MessageStatus::Failed => " (failed)",
    };
    format!(
        "[{}] <{}> {}{}",
        msg.created_at.format("%H:%M:%S%.3f"),
        msg.sender_id,
        msg.content,
        marker
    )
}
