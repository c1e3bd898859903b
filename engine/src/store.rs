//! The authoritative copy of every match.
//!
//! Each match lives in its own cell: readers load the published `Arc<Match>`
//! without locking, while writers queue on a per-match async mutex, mutate a
//! private clone and publish it with a single pointer swap. Readers therefore
//! see the state before or after a ball, never halfway through one.

use crate::error::{EngineError, EngineResult};
use crate::processor::{self, ProcessedEvent, RawDelivery, UndoneDelivery};
use crate::{
    CommentaryEntry, Delivery, Innings, InningsEnd, InningsState, Match, MatchConfig, MatchId,
    MatchStatus, Over, TossDecision, TossResult, BALLS_PER_OVER,
};
use arc_swap::ArcSwap;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct WriterState {
    /// Set when an audit fails. The match takes no further writes until it
    /// is repaired.
    fault: Option<String>,
}

#[derive(Debug)]
struct MatchCell {
    current: ArcSwap<Match>,
    writer: Arc<Mutex<WriterState>>,
}

/// The result of a committed write, still holding the match's writer section.
/// Anything done before dropping it (publishing envelopes, subscribing) is
/// ordered with respect to other writes on the same match.
#[derive(Debug)]
pub struct Locked<T> {
    pub snapshot: Arc<Match>,
    pub value: T,
    _writer: OwnedMutexGuard<WriterState>,
}

impl<T> Locked<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

#[derive(Debug, Default)]
pub struct MatchStore {
    cells: RwLock<HashMap<MatchId, Arc<MatchCell>>>,
}

impl MatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_match(&self, config: MatchConfig) -> EngineResult<Arc<Match>> {
        validate_config(&config)?;
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        if cells.contains_key(&config.id) {
            return Err(EngineError::DuplicateMatch(config.id));
        }
        let id = config.id.clone();
        let snapshot = Arc::new(Match::new(config));
        cells.insert(
            id.clone(),
            Arc::new(MatchCell {
                current: ArcSwap::new(snapshot.clone()),
                writer: Arc::new(Mutex::new(WriterState::default())),
            }),
        );
        info!("match {id} created");
        Ok(snapshot)
    }

    pub fn get_match(&self, id: &str) -> Option<Arc<Match>> {
        self.cell(id).ok().map(|cell| cell.current.load_full())
    }

    /// Published snapshots of every match, ordered by id.
    pub fn list_matches(&self) -> Vec<Arc<Match>> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        let mut matches: Vec<Arc<Match>> = cells.values().map(|c| c.current.load_full()).collect();
        matches.sort_by(|a, b| a.id().cmp(b.id()));
        matches
    }

    fn cell(&self, id: &str) -> EngineResult<Arc<MatchCell>> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        cells.get(id).cloned().ok_or_else(|| EngineError::NotFound(id.to_owned()))
    }

    /// Run `f` against a draft of the match and publish the draft if `f`
    /// succeeds and the result passes the audit. On any error nothing is
    /// published.
    pub async fn transact<T, F>(&self, id: &str, f: F) -> EngineResult<Locked<T>>
    where
        F: FnOnce(&mut Match) -> EngineResult<T>,
    {
        let cell = self.cell(id)?;
        let mut writer = cell.writer.clone().lock_owned().await;
        if let Some(detail) = &writer.fault {
            return Err(EngineError::InternalInconsistency { match_id: id.to_owned(), detail: detail.clone() });
        }

        let mut draft = Match::clone(&cell.current.load());
        let value = f(&mut draft)?;

        if let Err(detail) = audit(&draft) {
            error!("match {id}: audit failed, refusing further writes: {detail}");
            writer.fault = Some(detail.clone());
            return Err(EngineError::InternalInconsistency { match_id: id.to_owned(), detail });
        }

        let snapshot = Arc::new(draft);
        cell.current.store(snapshot.clone());
        Ok(Locked { snapshot, value, _writer: writer })
    }

    /// Manual correction of a match refused by the audit. `f` edits a draft
    /// of the last published state; if the result passes the audit it is
    /// published and writes are accepted again.
    pub async fn repair<F>(&self, id: &str, f: F) -> EngineResult<Arc<Match>>
    where
        F: FnOnce(&mut Match),
    {
        let cell = self.cell(id)?;
        let mut writer = cell.writer.clone().lock_owned().await;

        let mut draft = Match::clone(&cell.current.load());
        f(&mut draft);
        if let Err(detail) = audit(&draft) {
            warn!("match {id}: repair rejected: {detail}");
            return Err(EngineError::InternalInconsistency { match_id: id.to_owned(), detail });
        }

        let snapshot = Arc::new(draft);
        cell.current.store(snapshot.clone());
        if writer.fault.take().is_some() {
            info!("match {id}: repaired, accepting writes again");
        }
        Ok(snapshot)
    }

    /// Hold the writer section without changing anything.
    pub async fn freeze(&self, id: &str) -> EngineResult<Locked<()>> {
        let cell = self.cell(id)?;
        let writer = cell.writer.clone().lock_owned().await;
        let snapshot = cell.current.load_full();
        Ok(Locked { snapshot, value: (), _writer: writer })
    }

    pub async fn apply_toss_result(
        &self,
        id: &str,
        won_by: &str,
        decision: TossDecision,
    ) -> EngineResult<Locked<TossResult>> {
        self.transact(id, |m| processor::apply_toss(m, won_by, decision)).await
    }

    pub async fn begin_innings(&self, id: &str) -> EngineResult<Locked<u8>> {
        self.transact(id, processor::begin_innings).await
    }

    /// Validate and apply one ball, recording the commentary line `describe`
    /// produces for it in the same write.
    pub async fn append_delivery<D>(
        &self,
        id: &str,
        raw: RawDelivery,
        describe: D,
    ) -> EngineResult<Locked<(ProcessedEvent, CommentaryEntry)>>
    where
        D: FnOnce(&ProcessedEvent) -> String,
    {
        self.transact(id, |m| {
            let event = processor::process(m, raw)?;
            let text = describe(&event);
            let sequence = m.push_commentary(
                event.totals.number,
                event.totals.overs.clone(),
                text.clone(),
                event.delivery.clone(),
            );
            let entry = CommentaryEntry {
                sequence,
                innings: event.totals.number,
                over: event.totals.overs.clone(),
                text,
                delivery: event.delivery.clone(),
            };
            Ok((event, entry))
        })
        .await
    }

    pub async fn undo_last_delivery(&self, id: &str) -> EngineResult<Locked<UndoneDelivery>> {
        self.transact(id, processor::undo).await
    }

    /// Returns the status the match had before the call.
    pub async fn set_status(&self, id: &str, status: MatchStatus) -> EngineResult<Locked<MatchStatus>> {
        self.transact(id, |m| processor::set_status(m, status)).await
    }

    /// Mark a finished match as archived. Returns false if it already was.
    pub async fn archive(&self, id: &str) -> EngineResult<Locked<bool>> {
        self.transact(id, |m| {
            if !m.status.is_finished() {
                return Err(EngineError::conflict(m.id(), format!("a {} match cannot be archived", m.status)));
            }
            let changed = !m.archived;
            m.archived = true;
            Ok(changed)
        })
        .await
    }
}

fn validate_config(config: &MatchConfig) -> EngineResult<()> {
    let invalid = |msg: String| -> EngineResult<()> { Err(EngineError::InvalidConfig(msg)) };
    if config.id.trim().is_empty() {
        return invalid("match id is empty".into());
    }
    if config.home.id == config.away.id {
        return invalid(format!("both sides are {}", config.home.id));
    }
    if config.overs == 0 {
        return invalid("overs must be at least 1".into());
    }
    if config.players_per_team < 2 {
        return invalid("a side needs at least 2 players".into());
    }
    let mut seen = HashSet::new();
    for team in [&config.home, &config.away] {
        if team.players.len() != usize::from(config.players_per_team) {
            return invalid(format!(
                "{} lists {} players, expected {}",
                team.id,
                team.players.len(),
                config.players_per_team
            ));
        }
        for player in &team.players {
            if !seen.insert(player.id.as_str()) {
                return invalid(format!("player {} appears more than once", player.id));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Appending and replaying the delivery log
// ---------------------------------------------------------------------------

impl Innings {
    /// Append a ball that already passed validation. Returns true when it
    /// completed the over.
    pub(crate) fn push_delivery(&mut self, delivery: Delivery, config: &MatchConfig) -> bool {
        if self.overs.last().is_none_or(Over::is_complete) {
            let number = self.overs.len() as u16 + 1;
            self.overs.push(Over { number, bowler: delivery.bowler.clone(), deliveries: Vec::new() });
        }

        self.runs += delivery.total_runs();
        if delivery.is_legal() {
            self.legal_balls += 1;
        }
        if delivery.wicket.is_some() {
            self.wickets += 1;
        }

        let mut over_completed = false;
        let mut closes_maiden = false;
        if let Some(over) = self.overs.last_mut() {
            over.deliveries.push(delivery.clone());
            over_completed = over.is_complete();
            closes_maiden = over_completed && over.bowler_runs() == 0;
        }
        self.stats.record(&delivery, closes_maiden);

        self.state = InningsState::InProgress;
        self.end = self.closing_reason(config);
        if self.end.is_some() {
            self.state = InningsState::Completed;
        }
        over_completed
    }

    fn closing_reason(&self, config: &MatchConfig) -> Option<InningsEnd> {
        if self.target.is_some_and(|target| self.runs >= target) {
            Some(InningsEnd::TargetReached)
        } else if self.wickets >= config.wicket_limit() {
            Some(InningsEnd::AllOut)
        } else if self.legal_balls >= config.max_legal_balls() {
            Some(InningsEnd::OversExhausted)
        } else {
            None
        }
    }

    /// Rebuild this innings from its own delivery log.
    pub(crate) fn replay(&self, config: &MatchConfig) -> Innings {
        let mut fresh = Innings::new(self.number, self.batting.clone(), self.bowling.clone(), self.target);
        for delivery in self.deliveries() {
            fresh.push_delivery(delivery.clone(), config);
        }
        fresh
    }
}

/// Check every running counter against the delivery log.
fn audit(m: &Match) -> Result<(), String> {
    let limit = m.config.wicket_limit();
    for innings in &m.innings {
        let n = innings.number;
        let runs: u32 = innings.deliveries().map(Delivery::total_runs).sum();
        let legal = innings.deliveries().filter(|d| d.is_legal()).count() as u32;
        let wickets = innings.deliveries().filter(|d| d.wicket.is_some()).count();

        if innings.runs != runs {
            return Err(format!("innings {n}: total {} but deliveries sum to {runs}", innings.runs));
        }
        if innings.legal_balls != legal {
            return Err(format!("innings {n}: {} legal balls recorded, {legal} in the log", innings.legal_balls));
        }
        if usize::from(innings.wickets) != wickets {
            return Err(format!("innings {n}: {} wickets recorded, {wickets} in the log", innings.wickets));
        }
        if innings.wickets > limit {
            return Err(format!("innings {n}: {} wickets exceeds the limit of {limit}", innings.wickets));
        }
        let short_over = innings
            .overs
            .iter()
            .rev()
            .skip(1)
            .find(|o| o.legal_balls() != BALLS_PER_OVER);
        if let Some(over) = short_over {
            return Err(format!("innings {n}: over {} closed with {} legal balls", over.number, over.legal_balls()));
        }
        if innings.replay(&m.config) != *innings {
            return Err(format!("innings {n}: derived figures differ from a replay of the log"));
        }
    }
    debug!("match {}: audit ok", m.id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    async fn store_with_live_match() -> MatchStore {
        let store = MatchStore::new();
        store.create_match(config("m1", 20, 11)).unwrap();
        store.apply_toss_result("m1", "ind", TossDecision::Bat).await.unwrap();
        store.begin_innings("m1").await.unwrap();
        store
    }

    #[test]
    fn duplicate_match_is_rejected() {
        let store = MatchStore::new();
        store.create_match(config("m1", 20, 11)).unwrap();
        let err = store.create_match(config("m1", 20, 11)).unwrap_err();
        assert_eq!(err, EngineError::DuplicateMatch("m1".into()));
    }

    #[test]
    fn config_with_short_side_is_rejected() {
        let mut cfg = config("m1", 20, 11);
        cfg.away.players.pop();
        let err = MatchStore::new().create_match(cfg).unwrap_err();
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn config_with_shared_player_is_rejected() {
        let mut cfg = config("m1", 20, 2);
        cfg.away.players[0].id = "ind1".into();
        assert!(MatchStore::new().create_match(cfg).is_err());
    }

    #[tokio::test]
    async fn unknown_match_is_not_found() {
        let store = MatchStore::new();
        let err = store.begin_innings("nope").await.unwrap_err();
        assert_eq!(err, EngineError::NotFound("nope".into()));
        assert!(store.get_match("nope").is_none());
    }

    #[tokio::test]
    async fn rejected_ball_leaves_state_untouched() {
        let store = store_with_live_match().await;
        let before = store.get_match("m1").unwrap();
        let err = store
            .append_delivery("m1", raw("ind1", "ind1", "aus1", 0), |_| "x".into())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "same_batters");
        let after = store.get_match("m1").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn earlier_snapshots_are_not_mutated() {
        let store = store_with_live_match().await;
        let before = store.get_match("m1").unwrap();
        store
            .append_delivery("m1", raw("ind1", "ind2", "aus1", 4), |_| "FOUR".into())
            .await
            .unwrap();
        assert_eq!(before.innings[0].runs, 0);
        let after = store.get_match("m1").unwrap();
        assert_eq!(after.innings[0].runs, 4);
        assert_eq!(after.commentary.len(), 1);
        assert_eq!(after.commentary[0].text, "FOUR");
        assert_eq!(after.commentary[0].over, "0.1");
    }

    #[tokio::test]
    async fn undo_pops_commentary_and_sequence() {
        let store = store_with_live_match().await;
        for runs in [1, 2] {
            let bat = if runs == 1 { ("ind1", "ind2") } else { ("ind2", "ind1") };
            store
                .append_delivery("m1", raw(bat.0, bat.1, "aus1", runs), |e| format!("{} runs", e.delivery.runs_off_bat))
                .await
                .unwrap();
        }
        let undone = store.undo_last_delivery("m1").await.unwrap().into_value();
        assert_eq!(undone.commentary_sequence, Some(2));

        let m = store.get_match("m1").unwrap();
        assert_eq!(m.commentary.len(), 1);
        assert_eq!(m.next_commentary_seq, 2);
        assert_eq!(m.innings[0].runs, 1);
    }

    #[tokio::test]
    async fn failed_audit_poisons_the_match() {
        let store = store_with_live_match().await;
        let err = store
            .transact("m1", |m| {
                if let Some(innings) = m.current_innings_mut() {
                    innings.runs += 5;
                }
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal_inconsistency");
        assert_eq!(store.get_match("m1").unwrap().innings[0].runs, 0);

        let err = store
            .append_delivery("m1", raw("ind1", "ind2", "aus1", 1), |_| String::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal_inconsistency");

        // A correction that still fails the audit keeps the match refused.
        let err = store
            .repair("m1", |m| {
                if let Some(innings) = m.current_innings_mut() {
                    innings.wickets = 3;
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal_inconsistency");
        assert!(store.append_delivery("m1", raw("ind1", "ind2", "aus1", 1), |_| String::new()).await.is_err());

        store.repair("m1", |_| {}).await.unwrap();
        let ok = store.append_delivery("m1", raw("ind1", "ind2", "aus1", 1), |_| String::new()).await.unwrap();
        assert_eq!(ok.snapshot.innings[0].runs, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_balls_on_one_match_are_serialized() {
        let store = Arc::new(store_with_live_match().await);
        let mut handles = Vec::new();
        for _ in 0..6 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append_delivery("m1", raw("ind1", "ind2", "aus1", 1), |_| "single".into()).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let m = store.get_match("m1").unwrap();
        assert_eq!(m.innings[0].legal_balls, 6);
        assert_eq!(m.innings[0].runs, 6);
        let sequences: Vec<u64> = m.commentary.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn archive_requires_finished_match() {
        let store = store_with_live_match().await;
        assert_eq!(store.archive("m1").await.unwrap_err().code(), "state_conflict");
        store.set_status("m1", MatchStatus::Abandoned).await.unwrap();
        assert!(store.archive("m1").await.unwrap().into_value());
        assert!(!store.archive("m1").await.unwrap().into_value());
        assert!(store.get_match("m1").unwrap().archived);
    }

    #[test]
    fn replay_matches_incremental_figures() {
        let mut m = live_match(20, 11);
        processor::process(&mut m, raw("ind1", "ind2", "aus1", 3)).unwrap();
        processor::process(&mut m, raw_extra("ind2", "ind1", "aus1", "leg_bye", 1)).unwrap();
        processor::process(&mut m, raw_wicket("ind1", "ind2", "aus1", "ind1", "stumped")).unwrap();
        let innings = &m.innings[0];
        assert_eq!(innings.replay(&m.config), *innings);
        assert!(audit(&m).is_ok());
    }

    #[test]
    fn audit_catches_wrong_legal_ball_count() {
        let mut m = live_match(20, 11);
        processor::process(&mut m, raw("ind1", "ind2", "aus1", 0)).unwrap();
        m.innings[0].legal_balls = 2;
        assert!(audit(&m).unwrap_err().contains("legal balls"));
    }
}
