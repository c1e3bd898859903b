//! Ties the store, commentary and broadcast together.
//!
//! Envelopes for a write are published while the store still holds that
//! match's writer section, so the order viewers see is the commit order.

use crate::broadcast::{Envelope, EnvelopeKind, Publisher, Subscription};
use crate::commentary::Commentator;
use crate::error::{EngineError, EngineResult};
use crate::processor::{ProcessedEvent, RawDelivery};
use crate::query::{MatchSnapshot, QueryService};
use crate::store::MatchStore;
use crate::{CommentaryEntry, Match, MatchConfig, MatchResult, MatchStatus, TossDecision};
use log::{info, warn};
use std::sync::Arc;

/// What the scorer gets back for an accepted ball.
#[derive(Debug, Clone)]
pub struct BallReport {
    pub event: ProcessedEvent,
    pub commentary: CommentaryEntry,
    pub envelope: Arc<Envelope>,
    /// Set when the ball finished the match.
    pub status_change: Option<Arc<Envelope>>,
}

/// A new viewer's starting point: the scoreboard as of `snapshot.last_sequence`
/// and a subscription that begins right after it.
#[derive(Debug)]
pub struct ViewerFeed {
    pub snapshot: MatchSnapshot,
    pub subscription: Subscription,
}

#[derive(Debug)]
pub struct ScoringEngine {
    store: Arc<MatchStore>,
    publisher: Arc<Publisher>,
    commentator: Commentator,
    query: QueryService,
}

impl ScoringEngine {
    pub fn new(commentator: Commentator, channel_capacity: usize) -> Self {
        let store = Arc::new(MatchStore::new());
        let publisher = Arc::new(Publisher::new(channel_capacity));
        let query = QueryService::new(store.clone(), publisher.clone());
        Self { store, publisher, commentator, query }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    pub fn create_match(&self, config: MatchConfig) -> EngineResult<Arc<Match>> {
        self.store.create_match(config).inspect_err(|e| warn!("create_match rejected: {e}"))
    }

    fn publish_status(&self, id: &str, status: MatchStatus, result: Option<MatchResult>) -> Arc<Envelope> {
        info!("match {id}: status now {status}");
        self.publisher.publish(id, EnvelopeKind::StatusChange { status, result })
    }

    pub async fn toss(&self, id: &str, won_by: &str, decision: TossDecision) -> EngineResult<Vec<Arc<Envelope>>> {
        let locked = self
            .store
            .apply_toss_result(id, won_by, decision)
            .await
            .inspect_err(|e| warn!("match {id}: toss rejected: {e}"))?;
        let toss = &locked.value;
        let published = vec![
            self.publisher.publish(
                id,
                EnvelopeKind::TossUpdate { won_by: toss.won_by.clone(), decision: toss.decision },
            ),
            self.publish_status(id, locked.snapshot.status, None),
        ];
        Ok(published)
    }

    pub async fn begin_innings(&self, id: &str) -> EngineResult<Vec<Arc<Envelope>>> {
        let locked = self
            .store
            .begin_innings(id)
            .await
            .inspect_err(|e| warn!("match {id}: begin_innings rejected: {e}"))?;
        let mut published = Vec::new();
        if locked.value == 1 {
            published.push(self.publish_status(id, locked.snapshot.status, None));
        }
        Ok(published)
    }

    pub async fn score_ball(&self, id: &str, raw: RawDelivery) -> EngineResult<BallReport> {
        let locked = self
            .store
            .append_delivery(id, raw, |event| self.commentator.describe(event))
            .await
            .inspect_err(|e| warn!("match {id}: ball rejected ({}): {e}", e.code()))?;
        let (event, commentary) = &locked.value;

        let envelope = self.publisher.publish(
            id,
            EnvelopeKind::BallUpdate {
                delivery: event.delivery.clone(),
                innings: event.totals.clone(),
                commentary: commentary.text.clone(),
                over_completed: event.over_completed,
                innings_end: event.innings_end,
                result: event.result.clone(),
            },
        );
        let status_change = event
            .result
            .clone()
            .map(|result| self.publish_status(id, locked.snapshot.status, Some(result)));

        Ok(BallReport { event: event.clone(), commentary: commentary.clone(), envelope, status_change })
    }

    pub async fn undo_last_ball(&self, id: &str) -> EngineResult<Vec<Arc<Envelope>>> {
        let locked = self
            .store
            .undo_last_delivery(id)
            .await
            .inspect_err(|e| warn!("match {id}: undo rejected: {e}"))?;
        let undone = &locked.value;
        let mut published = vec![self.publisher.publish(
            id,
            EnvelopeKind::BallUndone {
                innings: undone.totals.clone(),
                commentary_sequence: undone.commentary_sequence,
            },
        )];
        if undone.reopened_match {
            published.push(self.publish_status(id, locked.snapshot.status, None));
        }
        Ok(published)
    }

    pub async fn set_status(&self, id: &str, status: MatchStatus) -> EngineResult<Vec<Arc<Envelope>>> {
        let locked = self
            .store
            .set_status(id, status)
            .await
            .inspect_err(|e| warn!("match {id}: status change rejected: {e}"))?;
        let mut published = Vec::new();
        if locked.value != locked.snapshot.status {
            published.push(self.publish_status(id, locked.snapshot.status, locked.snapshot.result.clone()));
        }
        Ok(published)
    }

    /// Archive a finished match and end every subscription to it.
    pub async fn archive(&self, id: &str) -> EngineResult<bool> {
        let locked = self.store.archive(id).await?;
        if locked.value {
            self.publisher.close_match(id);
            info!("match {id} archived");
        }
        Ok(locked.value)
    }

    pub async fn subscribe(&self, id: &str, with_history: bool) -> EngineResult<ViewerFeed> {
        let frozen = self.store.freeze(id).await?;
        let subscription = self.publisher.subscribe(id);
        let snapshot = MatchSnapshot::build(&frozen.snapshot, self.publisher.last_sequence(id), with_history);
        drop(frozen);
        Ok(ViewerFeed { snapshot, subscription })
    }

    /// Matches finished long enough ago to archive. Used by the sweeper.
    pub fn finished_matches(&self) -> Vec<Arc<Match>> {
        self.store
            .list_matches()
            .into_iter()
            .filter(|m| m.status.is_finished() && !m.archived)
            .collect()
    }

    /// Clear an audit failure after the match has been checked by hand.
    /// Corrections are not broadcast; viewers see them in their next snapshot.
    pub async fn repair<F>(&self, id: &str, f: F) -> EngineResult<Arc<Match>>
    where
        F: FnOnce(&mut Match),
    {
        self.store.repair(id, f).await
    }

    pub fn get_match(&self, id: &str) -> EngineResult<Arc<Match>> {
        self.store.get_match(id).ok_or_else(|| EngineError::NotFound(id.to_owned()))
    }
}
