//! One websocket connection: commands in, replies and subscribed envelopes out.

use crate::messages::{ClientMessage, ServerMessage};
use crate::settings::Settings;
use anyhow::bail;
use cricket_engine::{EngineResult, Envelope, FeedEnd, MatchId, ScoringEngine, Subscription};
use futures_util::sink::Sink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<ScoringEngine>,
    settings: Arc<Settings>,
) -> anyhow::Result<()> {
    let ws = accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(settings.channel_capacity);
    let mut session = Session::new(engine, outbound_tx);
    info!("{peer} connected");

    let result = loop {
        tokio::select! {
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = session.handle_text(&text).await;
                        if let Err(e) = send_with_retry(&mut write, &reply, &settings).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = ServerMessage::bad_request("binary frames are not supported");
                        if let Err(e) = send_with_retry(&mut write, &reply, &settings).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Err(e)) => break Err(e.into()),
                }
            }
            outbound = outbound_rx.recv() => {
                let Some(message) = outbound else {
                    break Ok(());
                };
                if let Err(e) = send_with_retry(&mut write, &message, &settings).await {
                    break Err(e);
                }
            }
        }
    };

    session.close();
    info!("{peer} disconnected");
    result
}

/// Write one message, retrying the hand-off and the flush separately so a
/// message is never queued on the socket twice.
async fn send_with_retry<S>(write: &mut S, message: &ServerMessage, settings: &Settings) -> anyhow::Result<()>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let frame = Message::Text(serde_json::to_string(message)?.into());
    let mut queued = false;

    for attempt in 1..=settings.send_retries {
        if !queued {
            match timeout(settings.send_timeout, write.feed(frame.clone())).await {
                Ok(Ok(())) => queued = true,
                Ok(Err(e)) => {
                    warn!("send attempt {attempt} failed: {e}");
                    continue;
                }
                Err(_) => {
                    warn!("send attempt {attempt} timed out");
                    continue;
                }
            }
        }
        match timeout(settings.send_timeout, write.flush()).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => warn!("flush attempt {attempt} failed: {e}"),
            Err(_) => warn!("flush attempt {attempt} timed out"),
        }
    }
    bail!("gave up after {} attempts", settings.send_retries)
}

struct Session {
    engine: Arc<ScoringEngine>,
    outbound: mpsc::Sender<ServerMessage>,
    forwards: HashMap<MatchId, JoinHandle<()>>,
}

impl Session {
    fn new(engine: Arc<ScoringEngine>, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self { engine, outbound, forwards: HashMap::new() }
    }

    async fn handle_text(&mut self, text: &str) -> ServerMessage {
        match ClientMessage::parse(text) {
            Ok(message) => {
                let command = message.command();
                debug!("command {command}");
                self.handle(message).await.unwrap_or_else(|e| ServerMessage::rejected(command, &e))
            }
            Err(e) => ServerMessage::bad_request(format!("could not parse command: {e}")),
        }
    }

    async fn handle(&mut self, message: ClientMessage) -> EngineResult<ServerMessage> {
        let command = message.command();
        let engine = self.engine.clone();
        let reply = match message {
            ClientMessage::CreateMatch { config } => {
                let created = engine.create_match(config)?;
                ServerMessage::ack(command, created.id())
            }
            ClientMessage::Toss { match_id, won_by, decision } => {
                let published = engine.toss(&match_id, &won_by, decision).await?;
                ack_published(command, &match_id, &published)
            }
            ClientMessage::BeginInnings { match_id } => {
                let published = engine.begin_innings(&match_id).await?;
                ack_published(command, &match_id, &published)
            }
            ClientMessage::Ball { match_id, delivery } => {
                let report = engine.score_ball(&match_id, delivery).await?;
                let sequence = report.status_change.as_ref().unwrap_or(&report.envelope).sequence;
                ServerMessage::Ack {
                    command: command.to_string(),
                    match_id: Some(match_id),
                    sequence: Some(sequence),
                    commentary: Some(report.commentary.text),
                }
            }
            ClientMessage::Undo { match_id } => {
                let published = engine.undo_last_ball(&match_id).await?;
                ack_published(command, &match_id, &published)
            }
            ClientMessage::SetStatus { match_id, status } => {
                let published = engine.set_status(&match_id, status).await?;
                ack_published(command, &match_id, &published)
            }
            ClientMessage::Archive { match_id } => {
                engine.archive(&match_id).await?;
                ServerMessage::ack(command, &match_id)
            }
            ClientMessage::Subscribe { match_id, history } => {
                let feed = engine.subscribe(&match_id, history).await?;
                self.forward(match_id, feed.subscription);
                ServerMessage::Snapshot { snapshot: feed.snapshot }
            }
            ClientMessage::Unsubscribe { match_id } => {
                if let Some(task) = self.forwards.remove(&match_id) {
                    task.abort();
                }
                ServerMessage::ack(command, &match_id)
            }
            ClientMessage::ListLive => ServerMessage::LiveMatches { matches: engine.query().list_live_matches() },
            ClientMessage::Leaderboard { category, limit } => ServerMessage::Leaderboard {
                category,
                entries: engine.query().get_leaderboard(category, limit),
            },
        };
        Ok(reply)
    }

    /// Relay a subscription into this session's outbound queue. A repeated
    /// subscribe replaces the earlier feed.
    fn forward(&mut self, match_id: MatchId, mut subscription: Subscription) {
        let outbound = self.outbound.clone();
        let id = match_id.clone();
        let task = tokio::spawn(async move {
            while let Some(envelope) = subscription.next().await {
                let message = ServerMessage::Envelope { envelope: Envelope::clone(&envelope) };
                if outbound.send(message).await.is_err() {
                    return;
                }
            }
            let reason = subscription.ended().unwrap_or(FeedEnd::Closed);
            let _ = outbound.send(ServerMessage::SubscriptionEnded { match_id: id, reason }).await;
        });
        if let Some(previous) = self.forwards.insert(match_id, task) {
            previous.abort();
        }
    }

    fn close(&mut self) {
        for (_, task) in self.forwards.drain() {
            task.abort();
        }
    }
}

fn ack_published(command: &str, match_id: &str, published: &[Arc<Envelope>]) -> ServerMessage {
    ServerMessage::Ack {
        command: command.to_string(),
        match_id: Some(match_id.to_string()),
        sequence: published.last().map(|e| e.sequence),
        commentary: None,
    }
}
