pub mod broadcast;
pub mod commentary;
pub mod engine;
pub mod error;
pub mod processor;
pub mod query;
pub mod stats;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use broadcast::{Envelope, EnvelopeKind, FeedEnd, Publisher, Subscription};
pub use commentary::{Commentator, TemplateTable};
pub use engine::{BallReport, ScoringEngine, ViewerFeed};
pub use error::{EngineError, EngineResult, ValidationError};
pub use processor::{InningsTotals, ProcessedEvent, RawDelivery, RawWicket, UndoneDelivery};
pub use query::{
    InningsCard, LeaderboardCategory, LeaderboardEntry, LiveMatchSummary, MatchSnapshot, QueryService,
};
pub use stats::{BattingLine, BowlingLine, ExtrasBreakdown, InningsStats, Partnership};
pub use store::{Locked, MatchStore};

use serde::{Deserialize, Serialize};
use std::fmt;

pub type MatchId = String;
pub type TeamId = String;
pub type PlayerId = String;

/// Balls in a completed over. Only legal deliveries count.
pub const BALLS_PER_OVER: u32 = 6;

// ---------------------------------------------------------------------------
// Configuration, supplied before play starts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    #[serde(default)]
    pub short_name: String, // "IND"
    pub players: Vec<Player>,
}

impl Team {
    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn has_player(&self, id: &str) -> bool {
        self.player(id).is_some()
    }

    /// Short label for scorelines, falling back to the full name.
    pub fn label(&self) -> &str {
        if self.short_name.is_empty() { &self.name } else { &self.short_name }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchConfig {
    pub id: MatchId,
    pub home: Team,
    pub away: Team,
    /// Limited-overs format, e.g. 20 for T20.
    pub overs: u16,
    pub players_per_team: u8,
    #[serde(default)]
    pub venue: Option<String>,
    /// None = no per-bowler quota.
    #[serde(default)]
    pub max_overs_per_bowler: Option<u16>,
}

impl MatchConfig {
    pub fn team(&self, id: &str) -> Option<&Team> {
        if self.home.id == id {
            Some(&self.home)
        } else if self.away.id == id {
            Some(&self.away)
        } else {
            None
        }
    }

    pub fn opponent_of(&self, id: &str) -> Option<&Team> {
        if self.home.id == id {
            Some(&self.away)
        } else if self.away.id == id {
            Some(&self.home)
        } else {
            None
        }
    }

    pub fn max_legal_balls(&self) -> u32 {
        u32::from(self.overs) * BALLS_PER_OVER
    }

    pub fn wicket_limit(&self) -> u8 {
        self.players_per_team.saturating_sub(1)
    }

    /// Look a player up on either side.
    pub fn player(&self, id: &str) -> Option<&Player> {
        self.home.player(id).or_else(|| self.away.player(id))
    }

    pub fn player_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.player(id).map(|p| p.name.as_str()).unwrap_or(id)
    }
}

// ---------------------------------------------------------------------------
// Match lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    #[default]
    Scheduled,
    TossDone,
    Live,
    Completed,
    Abandoned,
}

impl MatchStatus {
    pub fn label(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::TossDone => "toss_done",
            MatchStatus::Live => "live",
            MatchStatus::Completed => "completed",
            MatchStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, MatchStatus::Completed | MatchStatus::Abandoned)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TossDecision {
    Bat,
    Bowl,
}

impl TossDecision {
    pub fn label(&self) -> &'static str {
        match self {
            TossDecision::Bat => "bat",
            TossDecision::Bowl => "bowl",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TossResult {
    pub won_by: TeamId,
    pub decision: TossDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Margin {
    Runs(u32),
    Wickets(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum MatchResult {
    Won { winner: TeamId, margin: Margin },
    Tie,
    NoResult,
}

impl MatchResult {
    pub fn describe(&self, config: &MatchConfig) -> String {
        match self {
            MatchResult::Won { winner, margin } => {
                let name = config.team(winner).map(|t| t.name.as_str()).unwrap_or(winner);
                match margin {
                    Margin::Runs(1) => format!("{name} won by 1 run"),
                    Margin::Runs(n) => format!("{name} won by {n} runs"),
                    Margin::Wickets(1) => format!("{name} won by 1 wicket"),
                    Margin::Wickets(n) => format!("{name} won by {n} wickets"),
                }
            }
            MatchResult::Tie => "Match tied".to_string(),
            MatchResult::NoResult => "No result".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Deliveries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraType {
    #[default]
    None,
    Wide,
    NoBall,
    Bye,
    LegBye,
}

impl ExtraType {
    /// Parse the scorer's wire spelling. Accepts both `no_ball` and `noball`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "none" => Some(ExtraType::None),
            "wide" => Some(ExtraType::Wide),
            "no_ball" | "noball" => Some(ExtraType::NoBall),
            "bye" => Some(ExtraType::Bye),
            "leg_bye" | "legbye" => Some(ExtraType::LegBye),
            _ => None,
        }
    }

    pub fn is_legal(&self) -> bool {
        !matches!(self, ExtraType::Wide | ExtraType::NoBall)
    }

    /// Wides and no-balls go against the bowler; byes and leg-byes do not.
    pub fn charged_to_bowler(&self) -> bool {
        !self.is_legal()
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExtraType::None => "none",
            ExtraType::Wide => "wide",
            ExtraType::NoBall => "no-ball",
            ExtraType::Bye => "bye",
            ExtraType::LegBye => "leg-bye",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissalKind {
    Bowled,
    Caught,
    Lbw,
    RunOut,
    Stumped,
    HitWicket,
    RetiredHurt,
}

impl DismissalKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "bowled" => Some(DismissalKind::Bowled),
            "caught" => Some(DismissalKind::Caught),
            "lbw" => Some(DismissalKind::Lbw),
            "run_out" | "runout" => Some(DismissalKind::RunOut),
            "stumped" => Some(DismissalKind::Stumped),
            "hit_wicket" => Some(DismissalKind::HitWicket),
            "retired_hurt" => Some(DismissalKind::RetiredHurt),
            _ => None,
        }
    }

    /// Whether the bowler gets the wicket in their figures.
    pub fn credited_to_bowler(&self) -> bool {
        !matches!(self, DismissalKind::RunOut | DismissalKind::RetiredHurt)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DismissalKind::Bowled => "bowled",
            DismissalKind::Caught => "caught",
            DismissalKind::Lbw => "lbw",
            DismissalKind::RunOut => "run out",
            DismissalKind::Stumped => "stumped",
            DismissalKind::HitWicket => "hit wicket",
            DismissalKind::RetiredHurt => "retired hurt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wicket {
    pub batter: PlayerId,
    pub kind: DismissalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fielder: Option<PlayerId>,
}

/// One ball as it was accepted into the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub striker: PlayerId,
    pub non_striker: PlayerId,
    pub bowler: PlayerId,
    #[serde(rename = "runs")]
    pub runs_off_bat: u8,
    #[serde(rename = "extraType")]
    pub extra: ExtraType,
    /// Every extra run on this ball, penalty included (a plain wide is 1).
    pub extra_runs: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wicket: Option<Wicket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

impl Delivery {
    pub fn is_legal(&self) -> bool {
        self.extra.is_legal()
    }

    pub fn total_runs(&self) -> u32 {
        u32::from(self.runs_off_bat) + u32::from(self.extra_runs)
    }

    pub fn bowler_runs(&self) -> u32 {
        let extras = if self.extra.charged_to_bowler() { u32::from(self.extra_runs) } else { 0 };
        u32::from(self.runs_off_bat) + extras
    }

    /// Balls faced excludes wides but includes no-balls.
    pub fn counts_as_ball_faced(&self) -> bool {
        self.extra != ExtraType::Wide
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Over {
    pub number: u16, // 1-based
    pub bowler: PlayerId,
    pub deliveries: Vec<Delivery>,
}

impl Over {
    pub fn legal_balls(&self) -> u32 {
        self.deliveries.iter().filter(|d| d.is_legal()).count() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.legal_balls() >= BALLS_PER_OVER
    }

    pub fn bowler_runs(&self) -> u32 {
        self.deliveries.iter().map(Delivery::bowler_runs).sum()
    }
}

// ---------------------------------------------------------------------------
// Innings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InningsState {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InningsEnd {
    OversExhausted,
    AllOut,
    TargetReached,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Innings {
    pub number: u8,
    pub batting: TeamId,
    pub bowling: TeamId,
    pub overs: Vec<Over>,
    pub runs: u32,
    pub wickets: u8,
    pub legal_balls: u32,
    pub target: Option<u32>,
    pub state: InningsState,
    pub end: Option<InningsEnd>,
    pub stats: InningsStats,
}

impl Innings {
    pub fn new(number: u8, batting: TeamId, bowling: TeamId, target: Option<u32>) -> Self {
        Self { number, batting, bowling, target, ..Self::default() }
    }

    pub fn deliveries(&self) -> impl Iterator<Item = &Delivery> {
        self.overs.iter().flat_map(|o| o.deliveries.iter())
    }

    pub fn last_delivery(&self) -> Option<&Delivery> {
        self.overs.last().and_then(|o| o.deliveries.last())
    }

    pub fn current_over(&self) -> Option<&Over> {
        self.overs.last()
    }

    pub fn is_open(&self) -> bool {
        self.state != InningsState::Completed
    }

    /// "12.3" style notation.
    pub fn overs_display(&self) -> String {
        stats::overs_notation(self.legal_balls)
    }
}

// ---------------------------------------------------------------------------
// Commentary log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentaryEntry {
    pub sequence: u64,
    pub innings: u8,
    /// Over notation after this ball, e.g. "3.4".
    pub over: String,
    pub text: String,
    pub delivery: Delivery,
}

// ---------------------------------------------------------------------------
// Match aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub config: MatchConfig,
    pub status: MatchStatus,
    pub toss: Option<TossResult>,
    pub innings: Vec<Innings>,
    /// Set when the first innings closes.
    pub target: Option<u32>,
    pub result: Option<MatchResult>,
    pub commentary: Vec<CommentaryEntry>,
    pub next_commentary_seq: u64,
    pub archived: bool,
    /// An empty second innings was rolled back by undo. It is opened again
    /// as soon as the first innings closes.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub second_innings_pending: bool,
}

impl Match {
    pub fn new(config: MatchConfig) -> Self {
        Self { config, next_commentary_seq: 1, ..Self::default() }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn current_innings(&self) -> Option<&Innings> {
        self.innings.last()
    }

    pub fn current_innings_mut(&mut self) -> Option<&mut Innings> {
        self.innings.last_mut()
    }

    /// The innings deliveries may be added to right now, if any.
    pub fn open_innings(&self) -> Option<&Innings> {
        self.innings.last().filter(|i| i.is_open())
    }

    /// Append a commentary line and return its sequence number.
    pub fn push_commentary(&mut self, innings: u8, over: String, text: String, delivery: Delivery) -> u64 {
        let sequence = self.next_commentary_seq;
        self.next_commentary_seq += 1;
        self.commentary.push(CommentaryEntry { sequence, innings, over, text, delivery });
        sequence
    }

    pub fn pop_commentary(&mut self) -> Option<CommentaryEntry> {
        let entry = self.commentary.pop()?;
        self.next_commentary_seq = self.next_commentary_seq.saturating_sub(1).max(1);
        Some(entry)
    }

    /// "IND 142/6 (18.2)" for the innings in play, if one has started.
    pub fn scoreline(&self) -> Option<String> {
        let innings = self.current_innings()?;
        let team = self.config.team(&innings.batting)?;
        Some(format!(
            "{} {}/{} ({})",
            team.label(),
            innings.runs,
            innings.wickets,
            innings.overs_display()
        ))
    }
}
