//! Builders shared by the unit tests.

use crate::{
    Delivery, DismissalKind, ExtraType, Match, MatchConfig, Player, RawDelivery, RawWicket, Team,
};

pub fn team(id: &str, name: &str, size: u8) -> Team {
    Team {
        id: id.into(),
        name: name.into(),
        short_name: id.to_uppercase(),
        players: (1..=size)
            .map(|n| Player { id: format!("{id}{n}"), name: format!("{name} Player {n}") })
            .collect(),
    }
}

/// India ("ind1".."indN") v Australia ("aus1".."ausN").
pub fn config(id: &str, overs: u16, players_per_team: u8) -> MatchConfig {
    MatchConfig {
        id: id.into(),
        home: team("ind", "India", players_per_team),
        away: team("aus", "Australia", players_per_team),
        overs,
        players_per_team,
        venue: Some("Eden Gardens".into()),
        max_overs_per_bowler: None,
    }
}

/// A match in the first innings with India batting.
pub fn live_match(overs: u16, players_per_team: u8) -> Match {
    let mut m = Match::new(config("m1", overs, players_per_team));
    crate::processor::apply_toss(&mut m, "ind", crate::TossDecision::Bat).unwrap();
    crate::processor::begin_innings(&mut m).unwrap();
    m
}

pub fn raw(striker: &str, non_striker: &str, bowler: &str, runs: u8) -> RawDelivery {
    RawDelivery {
        striker: Some(striker.into()),
        non_striker: Some(non_striker.into()),
        bowler: Some(bowler.into()),
        runs: Some(runs),
        ..Default::default()
    }
}

pub fn raw_extra(striker: &str, non_striker: &str, bowler: &str, extra: &str, extra_runs: u8) -> RawDelivery {
    RawDelivery {
        extra_type: Some(extra.into()),
        extra_runs: Some(extra_runs),
        ..raw(striker, non_striker, bowler, 0)
    }
}

pub fn raw_wicket(striker: &str, non_striker: &str, bowler: &str, out: &str, kind: &str) -> RawDelivery {
    RawDelivery {
        wicket: Some(RawWicket { batter: Some(out.into()), kind: Some(kind.into()), fielder: None }),
        ..raw(striker, non_striker, bowler, 0)
    }
}

pub fn delivery(runs: u8, extra: ExtraType, extra_runs: u8, wicket: Option<DismissalKind>) -> Delivery {
    Delivery {
        striker: "ind1".into(),
        non_striker: "ind2".into(),
        bowler: "aus1".into(),
        runs_off_bat: runs,
        extra,
        extra_runs,
        wicket: wicket.map(|kind| crate::Wicket { batter: "ind1".into(), kind, fielder: None }),
        zone: None,
    }
}
