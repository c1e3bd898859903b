//! Follow one match from the terminal.

use chrono::Local;
use cricket_engine::{Envelope, EnvelopeKind, FeedEnd, MatchConfig, MatchSnapshot};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::Deserialize;
use std::env;
use tokio::time::{Duration, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_WS: &str = "ws://127.0.0.1:8787";

/// The replies this viewer cares about; everything else is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum Incoming {
    Snapshot { snapshot: MatchSnapshot },
    Envelope { envelope: Envelope },
    Rejected { code: String, message: String },
    SubscriptionEnded { match_id: String, reason: FeedEnd },
    #[serde(other)]
    Other,
}

enum Next {
    Reconnect,
    Stop,
}

struct Watcher {
    url: String,
    match_id: String,
    history: bool,
    config: Option<MatchConfig>,
}

impl Watcher {
    async fn run(mut self) {
        loop {
            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    debug!("connected to {}", self.url);
                    let (mut write, mut read) = stream.split();
                    let subscribe = serde_json::json!({
                        "type": "subscribe",
                        "matchId": self.match_id,
                        "history": self.history,
                    });
                    if let Err(e) = write.send(Message::Text(subscribe.to_string().into())).await {
                        warn!("subscribe failed: {e}");
                    } else if let Next::Stop = self.read_loop(&mut read).await {
                        return;
                    }
                    // Only replay history on the first connection.
                    self.history = false;
                }
                Err(e) => warn!("connect to {} failed: {e}", self.url),
            }
            eprintln!("{} disconnected, retrying in 2s", stamp());
            sleep(Duration::from_secs(2)).await;
        }
    }

    async fn read_loop<S>(&mut self, read: &mut S) -> Next
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        while let Some(inbound) = read.next().await {
            match inbound {
                Ok(Message::Text(text)) => match serde_json::from_str::<Incoming>(&text) {
                    Ok(Incoming::Snapshot { snapshot }) => {
                        for line in render_snapshot(&snapshot) {
                            println!("{line}");
                        }
                        self.config = Some(snapshot.config);
                    }
                    Ok(Incoming::Envelope { envelope }) => {
                        println!("{}", render_envelope(&envelope, self.config.as_ref()));
                    }
                    Ok(Incoming::Rejected { code, message }) => {
                        eprintln!("server refused: {message} ({code})");
                        return Next::Stop;
                    }
                    Ok(Incoming::SubscriptionEnded { match_id, reason }) => {
                        if reason == FeedEnd::Lagged {
                            eprintln!("{} fell behind on {match_id}, catching up", stamp());
                            return Next::Reconnect;
                        }
                        println!("{} feed for {match_id} has ended", stamp());
                        return Next::Stop;
                    }
                    Ok(Incoming::Other) => {}
                    Err(e) => warn!("unreadable message: {e}"),
                },
                Ok(Message::Close(_)) => return Next::Reconnect,
                Ok(_) => {}
                Err(e) => {
                    warn!("read failed: {e}");
                    return Next::Reconnect;
                }
            }
        }
        Next::Reconnect
    }
}

fn stamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn render_snapshot(snapshot: &MatchSnapshot) -> Vec<String> {
    let config = &snapshot.config;
    let mut lines = vec![format!(
        "{} v {}{} [{}]",
        config.home.name,
        config.away.name,
        config.venue.as_deref().map(|v| format!(" at {v}")).unwrap_or_default(),
        snapshot.status
    )];
    for card in &snapshot.innings {
        let team = config.team(&card.batting_team).map(|t| t.label()).unwrap_or(&card.batting_team);
        let mut line = format!("  {team} {}/{} ({})", card.totals.runs, card.totals.wickets, card.totals.overs);
        if let (Some(rrr), Some(target)) = (card.required_run_rate, card.target) {
            let needed = target.saturating_sub(card.totals.runs);
            line.push_str(&format!("  need {needed} from {} balls, RRR {rrr:.2}", card.balls_remaining));
        }
        lines.push(line);
    }
    if let Some(text) = &snapshot.result_text {
        lines.push(format!("  {text}"));
    }
    for entry in snapshot.commentary.iter().flatten() {
        lines.push(format!("  {:>5}  {}", entry.over, entry.text));
    }
    lines
}

fn render_envelope(envelope: &Envelope, config: Option<&MatchConfig>) -> String {
    let body = match &envelope.payload {
        EnvelopeKind::BallUpdate { innings, commentary, result, .. } => {
            let mut line = format!("{:>5}  {commentary}  [{}/{}]", innings.overs, innings.runs, innings.wickets);
            if let (Some(result), Some(config)) = (result, config) {
                line.push_str(&format!("  {}", result.describe(config)));
            }
            line
        }
        EnvelopeKind::StatusChange { status, result } => match (result, config) {
            (Some(result), Some(config)) => format!("match {status}: {}", result.describe(config)),
            _ => format!("match {status}"),
        },
        EnvelopeKind::TossUpdate { won_by, decision } => {
            let team = config.and_then(|c| c.team(won_by)).map(|t| t.name.as_str()).unwrap_or(won_by);
            format!("{team} won the toss and chose to {}", decision.label())
        }
        EnvelopeKind::BallUndone { innings, .. } => {
            format!("last ball removed, back to {}/{} ({})", innings.runs, innings.wickets, innings.overs)
        }
    };
    format!("#{:<4} {body}", envelope.sequence)
}

fn handle_cli_args() -> Option<(String, bool)> {
    let mut match_id = None;
    let mut history = false;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{}", usage_text());
                return None;
            }
            "-V" | "--version" => {
                println!("crease-watch {}", env!("CARGO_PKG_VERSION"));
                return None;
            }
            "--history" => history = true,
            _ if arg.starts_with('-') || match_id.is_some() => {
                eprintln!("Unknown argument: {arg}\n\n{}", usage_text());
                std::process::exit(2);
            }
            _ => match_id = Some(arg.clone()),
        }
    }
    match match_id {
        Some(id) => Some((id, history)),
        None => {
            eprintln!("{}", usage_text());
            std::process::exit(2);
        }
    }
}

fn usage_text() -> &'static str {
    "crease-watch - follow a live cricket match

Usage:
  crease-watch <match-id> [--history]
  crease-watch --help
  crease-watch --version

Environment:
  CREASE_WS   Server URL (default ws://127.0.0.1:8787)
  RUST_LOG    Log filter (default warn)"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some((match_id, history)) = handle_cli_args() else {
        return Ok(());
    };

    better_panic::install();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let url = env::var("CREASE_WS").unwrap_or_else(|_| DEFAULT_WS.to_string());
    Watcher { url, match_id, history, config: None }.run().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: serde_json::Value) -> Envelope {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn ball_update_line() {
        let env = envelope(serde_json::json!({
            "matchId": "m1", "sequence": 12, "timestamp": "2026-03-01T10:00:00Z",
            "kind": "ball_update",
            "delivery": {"striker": "a1", "nonStriker": "a2", "bowler": "b1", "runs": 4, "extraType": "none", "extraRuns": 0},
            "innings": {"number": 1, "runs": 30, "wickets": 1, "legalBalls": 20, "overs": "3.2"},
            "commentary": "FOUR! through the covers.",
            "overCompleted": false
        }));
        assert_eq!(render_envelope(&env, None), "#12     3.2  FOUR! through the covers.  [30/1]");
    }

    async fn after(reply: serde_json::Value) -> Next {
        let mut watcher = Watcher { url: DEFAULT_WS.into(), match_id: "m1".into(), history: false, config: None };
        let frames: Vec<Result<Message, tokio_tungstenite::tungstenite::Error>> =
            vec![Ok(Message::Text(reply.to_string().into()))];
        watcher.read_loop(&mut futures_util::stream::iter(frames)).await
    }

    #[tokio::test]
    async fn lagged_feed_resubscribes_and_archived_feed_stops() {
        let lagged = after(serde_json::json!({"type": "subscription_ended", "matchId": "m1", "reason": "lagged"})).await;
        assert!(matches!(lagged, Next::Reconnect));
        let closed = after(serde_json::json!({"type": "subscription_ended", "matchId": "m1", "reason": "closed"})).await;
        assert!(matches!(closed, Next::Stop));
    }

    #[test]
    fn unknown_replies_are_ignored() {
        let msg: Incoming = serde_json::from_str(r#"{"type":"ack","command":"toss"}"#).unwrap();
        assert!(matches!(msg, Incoming::Other));
    }
}
