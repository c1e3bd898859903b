use crate::{DismissalKind, ExtraType, MatchId, PlayerId};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// A delivery the scorer sent that breaks a scoring rule. The match is left
/// exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed delivery: {field} {problem}")]
    Malformed { field: &'static str, problem: &'static str },
    #[error("unknown extra type {0:?}")]
    UnknownExtraType(String),
    #[error("unknown dismissal kind {0:?}")]
    UnknownDismissalKind(String),
    #[error("{0} is not playing in this match")]
    UnknownTeam(String),
    #[error("{player} is not in the {side} side")]
    UnknownPlayer { player: PlayerId, side: &'static str },
    #[error("striker and non-striker are both {0}")]
    SameBatters(PlayerId),
    #[error("{0} is already out")]
    BatterAlreadyOut(PlayerId),
    #[error("{0} is not at the crease")]
    BatterNotAtCrease(PlayerId),
    #[error("over is being bowled by {expected}, not {got}")]
    BowlerChangedMidOver { expected: PlayerId, got: PlayerId },
    #[error("{0} bowled the previous over")]
    ConsecutiveOvers(PlayerId),
    #[error("{player} has bowled the maximum {limit} overs")]
    BowlerQuotaExceeded { player: PlayerId, limit: u16 },
    #[error("runs off the bat are not allowed on a {}", .0.label())]
    RunsOnExtra(ExtraType),
    #[error("{} is not possible on a {}", .kind.label(), .extra.label())]
    DismissalNotAllowed { kind: DismissalKind, extra: ExtraType },
    #[error("{0} can only be dismissed this way as the striker")]
    DismissedBatterNotAtCrease(PlayerId),
    #[error("innings cannot have more than {limit} wickets")]
    WicketLimitExceeded { limit: u8 },
}

impl ValidationError {
    pub(crate) fn missing(field: &'static str) -> Self {
        ValidationError::Malformed { field, problem: "is missing" }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Malformed { .. } => "malformed",
            ValidationError::UnknownExtraType(_) => "unknown_extra_type",
            ValidationError::UnknownDismissalKind(_) => "unknown_dismissal_kind",
            ValidationError::UnknownTeam(_) => "unknown_team",
            ValidationError::UnknownPlayer { .. } => "unknown_player",
            ValidationError::SameBatters(_) => "same_batters",
            ValidationError::BatterAlreadyOut(_) => "batter_already_out",
            ValidationError::BatterNotAtCrease(_) => "batter_not_at_crease",
            ValidationError::BowlerChangedMidOver { .. } => "bowler_changed_mid_over",
            ValidationError::ConsecutiveOvers(_) => "consecutive_overs",
            ValidationError::BowlerQuotaExceeded { .. } => "bowler_quota_exceeded",
            ValidationError::RunsOnExtra(_) => "runs_on_extra",
            ValidationError::DismissalNotAllowed { .. } => "dismissal_not_allowed",
            ValidationError::DismissedBatterNotAtCrease(_) => "dismissed_batter_not_at_crease",
            ValidationError::WicketLimitExceeded { .. } => "wicket_limit_exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("match {match_id}: {reason}")]
    StateConflict { match_id: MatchId, reason: String },
    /// Derived counters disagree with the delivery log. Writes to the match
    /// stay refused until someone corrects it by hand.
    #[error("match {match_id} is inconsistent: {detail}")]
    InternalInconsistency { match_id: MatchId, detail: String },
    #[error("match {0} not found")]
    NotFound(MatchId),
    #[error("match {0} already exists")]
    DuplicateMatch(MatchId),
    #[error("invalid match configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    pub fn conflict(match_id: &str, reason: impl Into<String>) -> Self {
        EngineError::StateConflict { match_id: match_id.to_owned(), reason: reason.into() }
    }

    /// Stable identifier sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(e) => e.code(),
            EngineError::StateConflict { .. } => "state_conflict",
            EngineError::InternalInconsistency { .. } => "internal_inconsistency",
            EngineError::NotFound(_) => "not_found",
            EngineError::DuplicateMatch(_) => "duplicate_match",
            EngineError::InvalidConfig(_) => "invalid_config",
        }
    }
}
