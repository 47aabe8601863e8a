// Copyright 2025 Justin Hu
//
// This file is part of Tarot Online.
//
// Tarot Online is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// Tarot Online is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with Tarot Online. If not, see <https://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reading server for Tarot Online

mod model;

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use clap::Parser;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use log::{info, warn};
use rand::{SeedableRng, rngs::StdRng};
use thiserror::Error;
use tokio::{net::TcpListener, sync::Mutex};

use crate::model::ReadingState;
use tarot_common::{ClientCommand, ReadingSnapshot};

/// Extra settling time after the last base card's flip, before the table
/// accepts taps again
const SETTLE_GRACE: Duration = Duration::from_millis(400);

#[derive(Parser)]
struct Args {
    #[clap(short, long, default_value = "3030")]
    port: u16,
    /// Pause between one base card and the next, in milliseconds
    #[clap(long, default_value = "1200")]
    deal_interval_ms: u64,
    /// Delay between a card appearing and turning face up, in milliseconds
    #[clap(long, default_value = "600")]
    flip_offset_ms: u64,
    /// Fixed shuffle seed, for reproducible readings
    #[clap(long)]
    seed: Option<u64>,
}

#[derive(Debug, Error)]
enum ProtocolError {
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported frame type")]
    Unsupported,
}

/// A deferred presentation step, applied when its timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    /// Mount a card on the table
    Show(u32),
    /// Turn a card face up
    Flip(u32),
    /// Turn a card face up and let the table accept taps again
    FlipSettle(u32),
    /// Let the table accept taps again
    Settle,
}

struct Session {
    reading: Option<ReadingState>,
    /// Ids of cards mounted on the table
    visible: HashSet<u32>,
    /// Ids of cards turned face up
    flipped: HashSet<u32>,
    /// Whether a reveal sequence is in flight; taps are ignored meanwhile
    interacting: bool,
    /// Bumped whenever the current reading is superseded; pending timers
    /// from older epochs are discarded on firing
    epoch: u64,
    rng: StdRng,
    deal_interval: Duration,
    flip_offset: Duration,
    connections: HashMap<u64, SplitSink<WebSocket, Message>>,
    next_connection: u64,
}

impl Session {
    fn new(args: &Args) -> Self {
        Self {
            reading: None,
            visible: HashSet::new(),
            flipped: HashSet::new(),
            interacting: false,
            epoch: 0,
            rng: match args.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            },
            deal_interval: Duration::from_millis(args.deal_interval_ms),
            flip_offset: Duration::from_millis(args.flip_offset_ms),
            connections: HashMap::new(),
            next_connection: 0,
        }
    }

    fn snapshot(&self) -> Option<ReadingSnapshot> {
        self.reading
            .as_ref()
            .map(|reading| reading.snapshot(&self.visible, &self.flipped))
    }

    fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Show(id) => {
                self.visible.insert(id);
            }
            Effect::Flip(id) => {
                self.flipped.insert(id);
            }
            Effect::FlipSettle(id) => {
                self.flipped.insert(id);
                self.interacting = false;
            }
            Effect::Settle => {
                self.interacting = false;
            }
        }
    }

    /// Send the current snapshot to every connected renderer, dropping the
    /// ones that went away
    async fn broadcast(&mut self) {
        let payload = serde_json::to_string(&self.snapshot()).unwrap();

        let mut disconnected = Vec::new();
        for (&connection, sink) in self.connections.iter_mut() {
            if sink.send(Message::text(payload.clone())).await.is_err() {
                disconnected.push(connection);
            }
        }
        for connection in disconnected {
            self.connections.remove(&connection);
        }
    }

    async fn close_connection(&mut self, connection: u64, frame: CloseFrame) {
        if let Some(mut sink) = self.connections.remove(&connection) {
            let _ = sink.send(Message::Close(Some(frame))).await;
        }
    }
}

/// Run an effect after a delay, unless the reading it belongs to has been
/// superseded in the meantime
fn schedule_effect(state: &Arc<Mutex<Session>>, epoch: u64, delay: Duration, effect: Effect) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let mut session = state.lock().await;
        if session.epoch != epoch {
            // a stale timer from a discarded reading; it must not touch state
            return;
        }
        session.apply_effect(effect);
        session.broadcast().await;
    });
}

async fn handle_command(state: &Arc<Mutex<Session>>, command: ClientCommand) {
    let mut session = state.lock().await;
    match command {
        ClientCommand::Start => {
            if session.interacting {
                return;
            }
            session.epoch += 1;
            let epoch = session.epoch;
            session.visible.clear();
            session.flipped.clear();
            session.interacting = true;

            let reading = ReadingState::new(&mut session.rng);
            info!(
                "new reading: {} of {} cards planned",
                reading.dealt().len(),
                reading.total_planned_cards()
            );
            let base_ids: Vec<u32> = reading.dealt().iter().map(|card| card.id).collect();
            session.reading = Some(reading);

            // The base cards come out one at a time, each flipping face up a
            // beat after it appears
            for (i, &id) in base_ids.iter().enumerate() {
                let mount = session.deal_interval * i as u32;
                schedule_effect(state, epoch, mount, Effect::Show(id));
                schedule_effect(state, epoch, mount + session.flip_offset, Effect::Flip(id));
            }
            schedule_effect(
                state,
                epoch,
                session.deal_interval * base_ids.len() as u32 + SETTLE_GRACE,
                Effect::Settle,
            );

            session.broadcast().await;
        }
        ClientCommand::Advance => {
            if session.interacting {
                return;
            }
            let epoch = session.epoch;
            let flip_offset = session.flip_offset;
            let placed = match session.reading.as_mut() {
                Some(reading) if !reading.is_complete() => reading.advance(),
                _ => return,
            };
            if let Some(card) = placed {
                info!("dealt {} at {} as {:?}", card, card.position, card.role);
                session.interacting = true;
                session.visible.insert(card.id);
                schedule_effect(state, epoch, flip_offset, Effect::FlipSettle(card.id));
            }
            // Even a deal that placed nothing may have completed the reading
            session.broadcast().await;
        }
        ClientCommand::Stop => {
            let Some(reading) = session.reading.as_mut() else {
                return;
            };
            reading.stop();
            // Discard every pending reveal along with the automatic flow
            session.epoch += 1;
            session.interacting = false;
            info!("reading stopped by hand");
            session.broadcast().await;
        }
        ClientCommand::Reset => {
            session.epoch += 1;
            session.reading = None;
            session.visible.clear();
            session.flipped.clear();
            session.interacting = false;
            info!("reading discarded");
            session.broadcast().await;
        }
        ClientCommand::Major { id } => {
            // Only face-up cards can be tapped
            if session.interacting || !session.flipped.contains(&id) {
                return;
            }
            let changed = match &mut *session {
                Session {
                    reading: Some(reading),
                    rng,
                    ..
                } => reading.activate_major(id, rng),
                _ => return,
            };
            if changed {
                session.broadcast().await;
            }
        }
        ClientCommand::Minor { id } => {
            if session.interacting {
                return;
            }
            let Some(reading) = session.reading.as_mut() else {
                return;
            };
            if reading.activate_minor(id) {
                session.broadcast().await;
            }
        }
    }
}

fn parse_command(message: &Message) -> Result<Option<ClientCommand>, ProtocolError> {
    match message {
        Message::Text(text) => Ok(Some(serde_json::from_str(text)?)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => Ok(None),
        Message::Binary(_) => Err(ProtocolError::Unsupported),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let session = Arc::new(Mutex::new(Session::new(&args)));

    let app = Router::new()
        .route("/", get(websocket_handler))
        .with_state(session);

    info!("starting WebSocket server on ws://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<Mutex<Session>>>,
) -> Response {
    info!("new WebSocket connection established from {}", addr);
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: Arc<Mutex<Session>>) {
    let (mut send, mut recv) = socket.split();

    // Greet the renderer with whatever is on the table right now
    let mut session = state.lock().await;
    let payload = serde_json::to_string(&session.snapshot()).unwrap();
    if send.send(Message::text(payload)).await.is_err() {
        return;
    }
    let connection = session.next_connection;
    session.next_connection += 1;
    session.connections.insert(connection, send);
    drop(session);

    while let Some(Ok(message)) = recv.next().await {
        match parse_command(&message) {
            Ok(Some(command)) => handle_command(&state, command).await,
            Ok(None) => {}
            Err(error) => {
                warn!("connection {connection}: {error}");
                state
                    .lock()
                    .await
                    .close_connection(
                        connection,
                        CloseFrame {
                            code: 4002,
                            reason: "protocol error".into(),
                        },
                    )
                    .await;
                return;
            }
        }
    }

    // Peer went away
    state.lock().await.connections.remove(&connection);
}
