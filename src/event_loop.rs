//! # Call Event Loop
//!
//! Drives the [`PeerSessionManager`] from a single queue.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          EVENT LOOP                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  channel reader ──┐                                                 │
//! │  media capture ───┤                                                 │
//! │  connections ─────┼──► mpsc ──► rx.recv() ──► manager.handle_event  │
//! │  timers ──────────┤                               │                 │
//! │  CallHandle ──────┘                               ▼                 │
//! │                                          broadcast<CallEvent>       │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every producer posts into the same queue, so handlers never interleave:
//! an offer that arrives while an answer is being applied waits its turn.

use tokio::sync::mpsc;

use crate::events::ManagerEvent;
use crate::manager::PeerSessionManager;

/// Run the call event loop until the call is left
///
/// Tears the manager down on exit, whether the loop stopped on a leave
/// command or because every sender was dropped.
pub async fn run_event_loop(
    mut manager: PeerSessionManager,
    mut rx: mpsc::UnboundedReceiver<ManagerEvent>,
) {
    tracing::info!("Call event loop starting");

    loop {
        match rx.recv().await {
            Some(event) => {
                if !manager.handle_event(event).await {
                    tracing::info!("Leave requested, exiting event loop");
                    break;
                }
            }
            None => {
                tracing::info!("Event channel closed, exiting event loop");
                break;
            }
        }
    }

    manager.teardown().await;
    tracing::info!("Call event loop stopped");
}
