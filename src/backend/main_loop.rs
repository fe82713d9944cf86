use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::handlers::{self, Flow, Session};
use super::services::Services;
use crate::config::EngineConfig;
use crate::protocol::{EngineAction, UiEvent};

/// How long one live read may block before actions are checked again
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run a session on a dedicated tokio runtime (blocks the calling thread).
pub fn run_backend(
    action_rx: Receiver<EngineAction>,
    event_tx: Sender<UiEvent>,
    services: Services,
    config: EngineConfig,
) {
    // Create a Tokio runtime for this thread
    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            let _ = event_tx.send(UiEvent::Error(format!(
                "Failed to create Tokio runtime: {}",
                e
            )));
            return;
        }
    };

    rt.block_on(run_session(action_rx, event_tx, services, config));
}

/// Session event loop: drains UI actions, reads the live transport and
/// reconnects it after a loss. Returns on `Shutdown` or when the UI side
/// drops its action sender.
pub async fn run_session(
    action_rx: Receiver<EngineAction>,
    event_tx: Sender<UiEvent>,
    services: Services,
    config: EngineConfig,
) {
    let Services {
        history,
        sender,
        mut live,
    } = services;
    let mut session = Session::new();

    info!("session starting");
    let mut retry_at: Option<Instant> = None;
    if !handlers::connect_live(live.as_mut(), &mut session, &event_tx).await {
        retry_at = Some(Instant::now() + config.reconnect_delay);
    }

    loop {
        // Check for actions from the UI (non-blocking)
        loop {
            let action = match action_rx.try_recv() {
                Ok(action) => action,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("action channel closed, shutting down");
                    EngineAction::Shutdown
                }
            };
            let flow = handlers::handle_engine_action(
                action,
                &mut session,
                live.as_mut(),
                &history,
                &sender,
                &config,
                &event_tx,
            )
            .await;
            if flow == Flow::Stop {
                info!("session stopped");
                return;
            }
        }

        if !session.connected {
            match retry_at {
                Some(at) if Instant::now() >= at => {
                    retry_at = if handlers::connect_live(live.as_mut(), &mut session, &event_tx).await {
                        None
                    } else {
                        Some(Instant::now() + config.reconnect_delay)
                    };
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
            continue;
        }

        // Read from the live transport (with short timeout so we can check for actions)
        let lost = match timeout(POLL_INTERVAL, live.next_event()).await {
            Ok(Ok(Some(event))) => {
                handlers::handle_live_event(event, &session, &event_tx);
                None
            }
            Ok(Ok(None)) => Some("connection closed by peer".to_string()),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => None,
        };

        if let Some(reason) = lost {
            warn!(%reason, "live transport lost");
            session.connected = false;
            let _ = event_tx.send(UiEvent::Reconnecting { reason });
            retry_at = Some(Instant::now() + config.reconnect_delay);
        }
    }
}
