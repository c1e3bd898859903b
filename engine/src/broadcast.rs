//! Per-match fan-out of score updates.
//!
//! Every match gets one `tokio::sync::broadcast` channel. Sequence numbers are
//! handed out while the channel table is locked, so a subscriber sees them in
//! strictly increasing order. A subscriber that falls more than the channel
//! capacity behind is cut off rather than shown a gap.

use crate::processor::InningsTotals;
use crate::{Delivery, InningsEnd, MatchId, MatchResult, MatchStatus, TeamId, TossDecision};
use chrono::{DateTime, Utc};
use futures_util::Stream;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EnvelopeKind {
    BallUpdate {
        delivery: Delivery,
        innings: InningsTotals,
        commentary: String,
        over_completed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        innings_end: Option<InningsEnd>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<MatchResult>,
    },
    StatusChange {
        status: MatchStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<MatchResult>,
    },
    TossUpdate {
        won_by: TeamId,
        decision: TossDecision,
    },
    BallUndone {
        innings: InningsTotals,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commentary_sequence: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub match_id: MatchId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EnvelopeKind,
}

/// Why a subscription stopped delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedEnd {
    /// The match was archived.
    Closed,
    /// The subscriber fell more than the channel capacity behind.
    Lagged,
    Unsubscribed,
}

#[derive(Debug)]
struct Channel {
    /// None once the match has been closed.
    sender: Option<broadcast::Sender<Arc<Envelope>>>,
    last_sequence: u64,
}

#[derive(Debug)]
pub struct Publisher {
    capacity: usize,
    channels: Mutex<HashMap<MatchId, Channel>>,
    next_subscriber: AtomicU64,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Publisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
        }
    }

    fn with_channel<T>(&self, match_id: &str, f: impl FnOnce(&mut Channel) -> T) -> T {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let channel = channels.entry(match_id.to_owned()).or_insert_with(|| Channel {
            sender: Some(broadcast::channel(self.capacity).0),
            last_sequence: 0,
        });
        f(channel)
    }

    /// Stamp `payload` with the next sequence number for the match and send it
    /// to every current subscriber. Never waits on a subscriber.
    pub fn publish(&self, match_id: &str, payload: EnvelopeKind) -> Arc<Envelope> {
        self.with_channel(match_id, |channel| {
            channel.last_sequence += 1;
            let envelope = Arc::new(Envelope {
                match_id: match_id.to_owned(),
                sequence: channel.last_sequence,
                timestamp: Utc::now(),
                payload,
            });
            if let Some(sender) = &channel.sender {
                // Err only means nobody is listening.
                let delivered = sender.send(envelope.clone()).unwrap_or(0);
                debug!("match {match_id}: envelope {} to {delivered} subscribers", envelope.sequence);
            }
            envelope
        })
    }

    pub fn subscribe(&self, match_id: &str) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let receiver = self.with_channel(match_id, |channel| match &channel.sender {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        });
        debug!("match {match_id}: subscriber {id} joined");
        Subscription { id, match_id: match_id.to_owned(), receiver: Some(receiver), ended: None }
    }

    /// Returns false if the subscription had already ended.
    pub fn unsubscribe(&self, subscription: &mut Subscription) -> bool {
        subscription.unsubscribe()
    }

    /// End every subscription to the match once buffered envelopes drain.
    pub fn close_match(&self, match_id: &str) {
        self.with_channel(match_id, |channel| {
            if channel.sender.take().is_some() {
                debug!("match {match_id}: channel closed");
            }
        })
    }

    pub fn subscriber_count(&self, match_id: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(match_id)
            .and_then(|c| c.sender.as_ref())
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Sequence number of the most recent envelope, 0 if none was published.
    pub fn last_sequence(&self, match_id: &str) -> u64 {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(match_id).map_or(0, |c| c.last_sequence)
    }
}

/// One viewer's feed for one match.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    match_id: MatchId,
    receiver: Option<broadcast::Receiver<Arc<Envelope>>>,
    ended: Option<FeedEnd>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Set once the subscription has ended.
    pub fn ended(&self) -> Option<FeedEnd> {
        self.ended
    }

    /// Next envelope, or None once the subscription has ended.
    pub async fn next(&mut self) -> Option<Arc<Envelope>> {
        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Ok(envelope) => Some(envelope),
            Err(RecvError::Lagged(missed)) => {
                warn!(
                    "match {}: subscriber {} missed {missed} envelopes, dropping it",
                    self.match_id, self.id
                );
                self.end(FeedEnd::Lagged);
                None
            }
            Err(RecvError::Closed) => {
                self.end(FeedEnd::Closed);
                None
            }
        }
    }

    pub fn unsubscribe(&mut self) -> bool {
        self.end(FeedEnd::Unsubscribed)
    }

    fn end(&mut self, reason: FeedEnd) -> bool {
        let was_active = self.receiver.take().is_some();
        if was_active {
            self.ended = Some(reason);
            debug!("match {}: subscriber {} left ({reason:?})", self.match_id, self.id);
        }
        was_active
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<Envelope>> + Send {
        futures_util::stream::unfold(self, |mut sub| async move {
            let envelope = sub.next().await?;
            Some((envelope, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn status(status: MatchStatus) -> EnvelopeKind {
        EnvelopeKind::StatusChange { status, result: None }
    }

    #[tokio::test]
    async fn subscribers_see_increasing_sequences() {
        let publisher = Publisher::new(16);
        let mut sub = publisher.subscribe("m1");
        for s in [MatchStatus::TossDone, MatchStatus::Live, MatchStatus::Completed] {
            publisher.publish("m1", status(s));
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(sub.next().await.unwrap().sequence);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(publisher.last_sequence("m1"), 3);
    }

    #[tokio::test]
    async fn sequences_are_per_match() {
        let publisher = Publisher::new(16);
        publisher.publish("m1", status(MatchStatus::Live));
        publisher.publish("m1", status(MatchStatus::Live));
        let env = publisher.publish("m2", status(MatchStatus::Live));
        assert_eq!(env.sequence, 1);
        assert_eq!(publisher.last_sequence("m1"), 2);
        assert_eq!(publisher.last_sequence("nope"), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_dropped_without_gaps() {
        let publisher = Publisher::new(2);
        let mut slow = publisher.subscribe("m1");
        for _ in 0..5 {
            publisher.publish("m1", status(MatchStatus::Live));
        }
        assert!(slow.next().await.is_none());
        assert!(!slow.is_active());
        assert_eq!(slow.ended(), Some(FeedEnd::Lagged));

        let mut fresh = publisher.subscribe("m1");
        publisher.publish("m1", status(MatchStatus::Completed));
        assert_eq!(fresh.next().await.unwrap().sequence, 6);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let publisher = Publisher::new(4);
        let mut sub = publisher.subscribe("m1");
        let other = publisher.subscribe("m1");
        assert_eq!(publisher.subscriber_count("m1"), 2);

        assert!(publisher.unsubscribe(&mut sub));
        assert!(!publisher.unsubscribe(&mut sub));
        assert!(sub.next().await.is_none());
        assert_eq!(sub.ended(), Some(FeedEnd::Unsubscribed));
        assert_eq!(publisher.subscriber_count("m1"), 1);

        drop(other);
        assert_eq!(publisher.subscriber_count("m1"), 0);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let publisher = Publisher::new(4);
        let sub = publisher.subscribe("m1");
        publisher.publish("m1", status(MatchStatus::Completed));
        publisher.close_match("m1");

        let received: Vec<u64> = sub.into_stream().map(|e| e.sequence).collect().await;
        assert_eq!(received, vec![1]);

        let mut late = publisher.subscribe("m1");
        assert!(late.next().await.is_none());
        assert_eq!(late.ended(), Some(FeedEnd::Closed));
        assert_eq!(publisher.subscriber_count("m1"), 0);
    }

    #[test]
    fn envelope_json_shape() {
        let envelope = Envelope {
            match_id: "m1".into(),
            sequence: 4,
            timestamp: Utc::now(),
            payload: EnvelopeKind::TossUpdate { won_by: "ind".into(), decision: TossDecision::Bowl },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["kind"], "toss_update");
        assert_eq!(json["matchId"], "m1");
        assert_eq!(json["wonBy"], "ind");
        assert_eq!(json["decision"], "bowl");

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn ball_update_fields_are_camel_case() {
        let delivery = Delivery { runs_off_bat: 4, extra_runs: 0, ..Delivery::default() };
        let payload = EnvelopeKind::BallUpdate {
            delivery,
            innings: InningsTotals::default(),
            commentary: "Dot ball.".into(),
            over_completed: true,
            innings_end: None,
            result: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "ball_update");
        assert_eq!(json["overCompleted"], true);
        assert_eq!(json["innings"]["legalBalls"], 0);
        assert!(json.get("inningsEnd").is_none());
        // Same names the scorer submits.
        assert_eq!(json["delivery"]["runs"], 4);
        assert_eq!(json["delivery"]["extraType"], "none");
        assert_eq!(json["delivery"]["extraRuns"], 0);
        assert!(json["delivery"].get("runsOffBat").is_none());
    }
}
