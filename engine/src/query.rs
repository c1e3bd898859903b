//! Read-only projections over published match snapshots.

use crate::broadcast::Publisher;
use crate::error::{EngineError, EngineResult};
use crate::processor::InningsTotals;
use crate::stats::{self, BattingLine, BowlingLine, ExtrasBreakdown, Partnership};
use crate::store::MatchStore;
use crate::{
    CommentaryEntry, Innings, InningsEnd, InningsState, Match, MatchConfig, MatchId, MatchResult,
    MatchStatus, PlayerId, TeamId, TossResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveMatchSummary {
    pub match_id: MatchId,
    pub home: String,
    pub away: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    pub status: MatchStatus,
    /// e.g. "IND 142/6 (18.2)"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoreline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<u32>,
    pub last_sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardCategory {
    Runs,
    Wickets,
    Sixes,
    Fours,
}

impl LeaderboardCategory {
    pub fn label(&self) -> &'static str {
        match self {
            LeaderboardCategory::Runs => "runs",
            LeaderboardCategory::Wickets => "wickets",
            LeaderboardCategory::Sixes => "sixes",
            LeaderboardCategory::Fours => "fours",
        }
    }

    fn batting_value(&self, line: &BattingLine) -> u32 {
        match self {
            LeaderboardCategory::Runs => line.runs,
            LeaderboardCategory::Sixes => line.sixes,
            LeaderboardCategory::Fours => line.fours,
            LeaderboardCategory::Wickets => 0,
        }
    }
}

impl fmt::Display for LeaderboardCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Tied values share a rank.
    pub rank: u32,
    pub player: PlayerId,
    pub name: String,
    pub team: TeamId,
    pub value: u32,
    pub matches: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InningsCard {
    pub totals: InningsTotals,
    pub batting_team: TeamId,
    pub bowling_team: TeamId,
    pub state: InningsState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<InningsEnd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<u32>,
    pub balls_remaining: u32,
    pub current_run_rate: Option<f64>,
    /// Only while a chase is still on.
    pub required_run_rate: Option<f64>,
    pub extras: ExtrasBreakdown,
    pub batting: Vec<BattingLine>,
    pub bowling: Vec<BowlingLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partnership: Option<Partnership>,
}

impl InningsCard {
    pub fn build(innings: &Innings, config: &MatchConfig) -> Self {
        let balls_remaining = config.max_legal_balls().saturating_sub(innings.legal_balls);
        let required_run_rate = innings
            .target
            .filter(|_| innings.is_open())
            .and_then(|target| stats::required_run_rate(target, innings.runs, balls_remaining));
        Self {
            totals: innings.totals(),
            batting_team: innings.batting.clone(),
            bowling_team: innings.bowling.clone(),
            state: innings.state,
            end: innings.end,
            target: innings.target,
            balls_remaining,
            current_run_rate: stats::current_run_rate(innings.runs, innings.legal_balls),
            required_run_rate,
            extras: innings.stats.extras.clone(),
            batting: innings.stats.batting.clone(),
            bowling: innings.stats.bowling.clone(),
            partnership: innings.stats.current_partnership().cloned(),
        }
    }
}

/// Everything a viewer needs to draw the scoreboard before envelopes start
/// arriving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub match_id: MatchId,
    pub config: MatchConfig,
    pub status: MatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toss: Option<TossResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<MatchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<u32>,
    pub innings: Vec<InningsCard>,
    /// Envelopes with a higher sequence than this follow the snapshot.
    pub last_sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commentary: Option<Vec<CommentaryEntry>>,
}

impl MatchSnapshot {
    pub fn build(m: &Match, last_sequence: u64, with_history: bool) -> Self {
        Self {
            match_id: m.id().to_owned(),
            config: m.config.clone(),
            status: m.status,
            toss: m.toss.clone(),
            result_text: m.result.as_ref().map(|r| r.describe(&m.config)),
            result: m.result.clone(),
            target: m.target,
            innings: m.innings.iter().map(|i| InningsCard::build(i, &m.config)).collect(),
            last_sequence,
            commentary: with_history.then(|| m.commentary.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<MatchStore>,
    publisher: Arc<Publisher>,
}

impl QueryService {
    pub fn new(store: Arc<MatchStore>, publisher: Arc<Publisher>) -> Self {
        Self { store, publisher }
    }

    pub fn list_live_matches(&self) -> Vec<LiveMatchSummary> {
        self.store
            .list_matches()
            .into_iter()
            .filter(|m| m.status == MatchStatus::Live && !m.archived)
            .map(|m| LiveMatchSummary {
                match_id: m.id().to_owned(),
                home: m.config.home.name.clone(),
                away: m.config.away.name.clone(),
                venue: m.config.venue.clone(),
                status: m.status,
                scoreline: m.scoreline(),
                target: m.target,
                last_sequence: self.publisher.last_sequence(m.id()),
            })
            .collect()
    }

    /// Top `limit` players across every stored match.
    pub fn get_leaderboard(&self, category: LeaderboardCategory, limit: usize) -> Vec<LeaderboardEntry> {
        #[derive(Default)]
        struct Tally {
            name: String,
            team: TeamId,
            value: u32,
            matches: u32,
        }

        let mut tallies: HashMap<PlayerId, Tally> = HashMap::new();
        for m in self.store.list_matches() {
            let mut per_match: HashMap<&str, u32> = HashMap::new();
            for innings in &m.innings {
                if category == LeaderboardCategory::Wickets {
                    for line in &innings.stats.bowling {
                        *per_match.entry(line.player.as_str()).or_default() += line.wickets;
                    }
                } else {
                    for line in &innings.stats.batting {
                        *per_match.entry(line.player.as_str()).or_default() += category.batting_value(line);
                    }
                }
            }
            for (player, value) in per_match.into_iter().filter(|(_, v)| *v > 0) {
                let tally = tallies.entry(player.to_owned()).or_default();
                if tally.name.is_empty() {
                    tally.name = m.config.player_name(player).to_owned();
                    tally.team = [&m.config.home, &m.config.away]
                        .into_iter()
                        .find(|t| t.has_player(player))
                        .map(|t| t.id.clone())
                        .unwrap_or_default();
                }
                tally.value += value;
                tally.matches += 1;
            }
        }

        let mut ranked: Vec<(PlayerId, Tally)> = tallies.into_iter().collect();
        ranked.sort_by(|(a_id, a), (b_id, b)| {
            b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)).then_with(|| a_id.cmp(b_id))
        });

        let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(ranked.len().min(limit));
        for (position, (player, tally)) in ranked.into_iter().take(limit).enumerate() {
            let rank = match entries.last() {
                Some(prev) if prev.value == tally.value => prev.rank,
                _ => position as u32 + 1,
            };
            entries.push(LeaderboardEntry {
                rank,
                player,
                name: tally.name,
                team: tally.team,
                value: tally.value,
                matches: tally.matches,
            });
        }
        entries
    }

    pub fn match_snapshot(&self, id: &str, with_history: bool) -> EngineResult<MatchSnapshot> {
        let m = self.store.get_match(id).ok_or_else(|| EngineError::NotFound(id.to_owned()))?;
        Ok(MatchSnapshot::build(&m, self.publisher.last_sequence(id), with_history))
    }
}
