//! WebSocket connection lifecycle, shared by both peers.
//!
//! Each accepted socket splits into a reader (this task) and a writer task
//! fed by an unbounded channel, so the controller lane never blocks on a
//! slow socket. The reader forwards every text frame to the lane in wire
//! order and runs the heartbeat: a ping per interval, and a peer that stays
//! silent past the timeout counts as disconnected.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, MissedTickBehavior};

use crate::app::AppState;
use crate::controller::LaneMsg;
use crate::{HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT};

/// Which side of the debugger a socket belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Peer {
    Agent,
    Ui,
}

impl Peer {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Peer::Agent => "agent",
            Peer::Ui => "ui",
        }
    }
}

/// What the controller (and the reader, for pongs) can ask the writer to do.
#[derive(Debug)]
pub(crate) enum OutMsg {
    Text(String),
    Ping,
    Pong(Vec<u8>),
    /// Send a close frame with this reason, then stop writing.
    Close(String),
}

/// Cloneable handle the controller holds to reach one connection's writer.
#[derive(Clone, Debug)]
pub(crate) struct OutboundHandle {
    tx: UnboundedSender<OutMsg>,
}

impl OutboundHandle {
    pub(crate) fn send_text(&self, text: String) -> bool {
        self.tx.send(OutMsg::Text(text)).is_ok()
    }

    pub(crate) fn close(&self, reason: &str) {
        let _ = self.tx.send(OutMsg::Close(reason.to_string()));
    }
}

pub(crate) async fn handle_socket(socket: WebSocket, peer: Peer, state: Arc<AppState>) {
    if !state.claim(peer) {
        reject(socket, peer).await;
        return;
    }
    tracing::info!(peer = peer.label(), "connected");

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    if state
        .lane_tx
        .send(LaneMsg::Connected(peer, OutboundHandle { tx: out_tx.clone() }))
        .is_err()
    {
        state.release(peer);
        return;
    }

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, out_rx));
    read_loop(stream, peer, &state.lane_tx, &out_tx).await;

    let _ = state.lane_tx.send(LaneMsg::Disconnected(peer));
    state.release(peer);
    drop(out_tx);
    let _ = writer.await;
    tracing::info!(peer = peer.label(), "disconnected");
}

/// Second connection for an occupied slot: close frame with a readable
/// reason, nothing delivered, session untouched.
async fn reject(mut socket: WebSocket, peer: Peer) {
    let reason = match peer {
        Peer::Agent => "an agent is already connected",
        Peer::Ui => "a UI is already connected",
    };
    tracing::warn!(peer = peer.label(), "rejecting second connection");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    peer: Peer,
    lane_tx: &UnboundedSender<LaneMsg>,
    out_tx: &UnboundedSender<OutMsg>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_heard = Instant::now();

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let Some(res) = incoming else { break };
                let msg = match res {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(peer = peer.label(), error = %e, "read error (peer closed?)");
                        break;
                    }
                };
                last_heard = Instant::now();
                let text = match msg {
                    Message::Text(t) => t,
                    Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
                    Message::Ping(data) => {
                        let _ = out_tx.send(OutMsg::Pong(data));
                        continue;
                    }
                    Message::Pong(_) => continue,
                    Message::Close(_) => break,
                };
                if lane_tx.send(LaneMsg::Inbound(peer, text)).is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if last_heard.elapsed() > HEARTBEAT_TIMEOUT {
                    tracing::warn!(peer = peer.label(), "heartbeat missed, treating as disconnect");
                    break;
                }
                let _ = out_tx.send(OutMsg::Ping);
            }
        }
    }
}

async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: UnboundedReceiver<OutMsg>) {
    while let Some(msg) = rx.recv().await {
        let frame = match msg {
            OutMsg::Text(t) => Message::Text(t),
            OutMsg::Ping => Message::Ping(Vec::new()),
            OutMsg::Pong(data) => Message::Pong(data),
            OutMsg::Close(reason) => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        };
        if sink.send(frame).await.is_err() {
            break;
        }
    }
}
