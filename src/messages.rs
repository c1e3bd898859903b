use cricket_engine::{
    EngineError, Envelope, FeedEnd, LeaderboardCategory, LeaderboardEntry, LiveMatchSummary, MatchConfig, MatchId,
    MatchSnapshot, MatchStatus, RawDelivery, TossDecision,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

fn default_limit() -> usize {
    DEFAULT_LEADERBOARD_LIMIT
}

/// Everything a scorer or viewer can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    CreateMatch {
        config: MatchConfig,
    },
    Toss {
        match_id: MatchId,
        won_by: String,
        decision: TossDecision,
    },
    BeginInnings {
        match_id: MatchId,
    },
    Ball {
        match_id: MatchId,
        delivery: RawDelivery,
    },
    Undo {
        match_id: MatchId,
    },
    SetStatus {
        match_id: MatchId,
        status: MatchStatus,
    },
    Archive {
        match_id: MatchId,
    },
    Subscribe {
        match_id: MatchId,
        #[serde(default)]
        history: bool,
    },
    Unsubscribe {
        match_id: MatchId,
    },
    ListLive,
    Leaderboard {
        category: LeaderboardCategory,
        #[serde(default = "default_limit")]
        limit: usize,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn command(&self) -> &'static str {
        match self {
            ClientMessage::CreateMatch { .. } => "create_match",
            ClientMessage::Toss { .. } => "toss",
            ClientMessage::BeginInnings { .. } => "begin_innings",
            ClientMessage::Ball { .. } => "ball",
            ClientMessage::Undo { .. } => "undo",
            ClientMessage::SetStatus { .. } => "set_status",
            ClientMessage::Archive { .. } => "archive",
            ClientMessage::Subscribe { .. } => "subscribe",
            ClientMessage::Unsubscribe { .. } => "unsubscribe",
            ClientMessage::ListLive => "list_live",
            ClientMessage::Leaderboard { .. } => "leaderboard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Ack {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_id: Option<MatchId>,
        /// Sequence of the last envelope this command published.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commentary: Option<String>,
    },
    Rejected {
        command: String,
        code: String,
        message: String,
    },
    Snapshot {
        snapshot: MatchSnapshot,
    },
    LiveMatches {
        matches: Vec<LiveMatchSummary>,
    },
    Leaderboard {
        category: LeaderboardCategory,
        entries: Vec<LeaderboardEntry>,
    },
    Envelope {
        envelope: Envelope,
    },
    /// The server stopped forwarding a match. A `lagged` viewer may
    /// subscribe again for a fresh snapshot.
    SubscriptionEnded {
        match_id: MatchId,
        reason: FeedEnd,
    },
}

impl ServerMessage {
    pub fn ack(command: &str, match_id: &str) -> Self {
        ServerMessage::Ack {
            command: command.to_string(),
            match_id: Some(match_id.to_string()),
            sequence: None,
            commentary: None,
        }
    }

    pub fn rejected(command: &str, err: &EngineError) -> Self {
        ServerMessage::Rejected {
            command: command.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ServerMessage::Rejected {
            command: "unknown".to_string(),
            code: "bad_request".to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cricket_engine::ValidationError;

    #[test]
    fn test_parse_ball() {
        let msg = ClientMessage::parse(
            r#"{"type":"ball","matchId":"m1","delivery":{"striker":"a","nonStriker":"b","bowler":"c","runs":4,"zone":"cover"}}"#,
        )
        .unwrap();
        let ClientMessage::Ball { match_id, delivery } = msg else {
            panic!("expected a ball");
        };
        assert_eq!(match_id, "m1");
        assert_eq!(delivery.non_striker.as_deref(), Some("b"));
        assert_eq!(delivery.runs, Some(4));
        assert_eq!(delivery.extra_type, None);
    }

    #[test]
    fn optional_fields_have_defaults() {
        let msg = ClientMessage::parse(r#"{"type":"subscribe","matchId":"m1"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Subscribe { match_id: "m1".into(), history: false });

        let msg = ClientMessage::parse(r#"{"type":"leaderboard","category":"sixes"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Leaderboard { category: LeaderboardCategory::Sixes, limit: 10 });
        assert_eq!(msg.command(), "leaderboard");

        assert_eq!(ClientMessage::parse(r#"{"type":"list_live"}"#).unwrap(), ClientMessage::ListLive);
    }

    #[test]
    fn unknown_commands_fail_to_parse() {
        assert!(ClientMessage::parse(r#"{"type":"delete_everything"}"#).is_err());
        assert!(ClientMessage::parse("not json").is_err());
    }

    #[test]
    fn rejection_carries_the_rule() {
        let err = EngineError::from(ValidationError::SameBatters("a".into()));
        let json = serde_json::to_value(ServerMessage::rejected("ball", &err)).unwrap();
        assert_eq!(json["type"], "rejected");
        assert_eq!(json["code"], "same_batters");
        assert_eq!(json["message"], "striker and non-striker are both a");
    }

    #[test]
    fn subscription_end_names_the_reason() {
        let msg = ServerMessage::SubscriptionEnded { match_id: "m1".into(), reason: FeedEnd::Lagged };
        let json = serde_json::to_value(msg).unwrap();
        assert_eq!(json["type"], "subscription_ended");
        assert_eq!(json["matchId"], "m1");
        assert_eq!(json["reason"], "lagged");
    }

    #[test]
    fn ack_skips_empty_fields() {
        let json = serde_json::to_value(ServerMessage::ack("toss", "m1")).unwrap();
        assert_eq!(json["matchId"], "m1");
        assert!(json.get("sequence").is_none());
    }
}
