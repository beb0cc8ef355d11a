//! Axum app: shared state, the two routers, and WebSocket upgrade handlers.
//!
//! Each peer gets its own listener and router. The single-connection
//! discipline lives here: a slot per peer, claimed before the socket enters
//! the connection loop and released when it leaves. A second connection is
//! upgraded just far enough to receive a close frame with a readable
//! reason, then dropped; the existing session is undisturbed.

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

use crate::connection::{self, Peer};
use crate::controller::LaneMsg;

pub(crate) struct AppState {
    pub(crate) lane_tx: UnboundedSender<LaneMsg>,
    slots: Mutex<Slots>,
}

#[derive(Default)]
struct Slots {
    agent: bool,
    ui: bool,
}

impl AppState {
    pub(crate) fn new(lane_tx: UnboundedSender<LaneMsg>) -> Self {
        Self {
            lane_tx,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Claims the peer's slot; false when a connection already holds it.
    pub(crate) fn claim(&self, peer: Peer) -> bool {
        let Ok(mut slots) = self.slots.lock() else {
            return false;
        };
        let slot = match peer {
            Peer::Agent => &mut slots.agent,
            Peer::Ui => &mut slots.ui,
        };
        if *slot {
            false
        } else {
            *slot = true;
            true
        }
    }

    pub(crate) fn release(&self, peer: Peer) {
        if let Ok(mut slots) = self.slots.lock() {
            match peer {
                Peer::Agent => slots.agent = false,
                Peer::Ui => slots.ui = false,
            }
        }
    }
}

pub(crate) fn agent_router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(agent_ws_handler)).with_state(state)
}

pub(crate) fn ui_router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(ui_ws_handler)).with_state(state)
}

async fn agent_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, Peer::Agent, state))
}

/// The UI channel carries export/import payloads, so incoming size limits
/// are lifted on this endpoint only.
async fn ui_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.max_message_size(usize::MAX)
        .max_frame_size(usize::MAX)
        .on_upgrade(move |socket| connection::handle_socket(socket, Peer::Ui, state))
}
