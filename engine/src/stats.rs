//! Incremental batting, bowling and partnership figures for one innings.
//!
//! Everything here is a deterministic function of the deliveries recorded so
//! far: the store re-runs [`InningsStats::record`] over the whole log when it
//! audits a commit or truncates on undo, and the two must agree.

use crate::{BALLS_PER_OVER, Delivery, DismissalKind, ExtraType, PlayerId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dismissal {
    pub kind: DismissalKind,
    pub bowler: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fielder: Option<PlayerId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattingLine {
    pub player: PlayerId,
    pub runs: u32,
    pub balls: u32,
    pub fours: u32,
    pub sixes: u32,
    pub dismissal: Option<Dismissal>,
}

impl BattingLine {
    fn new(player: &str) -> Self {
        Self { player: player.to_owned(), ..Self::default() }
    }

    pub fn is_out(&self) -> bool {
        self.dismissal.is_some()
    }

    pub fn strike_rate(&self) -> Option<f64> {
        strike_rate(self.runs, self.balls)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BowlingLine {
    pub player: PlayerId,
    pub legal_balls: u32,
    pub runs_conceded: u32,
    pub wickets: u32,
    pub maidens: u32,
    pub wides: u32,
    pub no_balls: u32,
}

impl BowlingLine {
    fn new(player: &str) -> Self {
        Self { player: player.to_owned(), ..Self::default() }
    }

    pub fn economy(&self) -> Option<f64> {
        economy_rate(self.runs_conceded, self.legal_balls)
    }

    pub fn overs_display(&self) -> String {
        overs_notation(self.legal_balls)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partnership {
    pub batters: (PlayerId, PlayerId),
    pub runs: u32,
    pub balls: u32,
}

impl Partnership {
    fn involves_pair(&self, a: &str, b: &str) -> bool {
        let (x, y) = (&self.batters.0, &self.batters.1);
        (x == a && y == b) || (x == b && y == a)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtrasBreakdown {
    pub wides: u32,
    pub no_balls: u32,
    pub byes: u32,
    pub leg_byes: u32,
}

impl ExtrasBreakdown {
    pub fn total(&self) -> u32 {
        self.wides + self.no_balls + self.byes + self.leg_byes
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InningsStats {
    /// In order of arrival at the crease.
    pub batting: Vec<BattingLine>,
    /// In order of first ball bowled.
    pub bowling: Vec<BowlingLine>,
    pub partnerships: Vec<Partnership>,
    pub extras: ExtrasBreakdown,
}

impl InningsStats {
    /// Fold one delivery into the figures. `closes_maiden` is true when this
    /// ball completes an over in which the bowler conceded nothing.
    pub fn record(&mut self, delivery: &Delivery, closes_maiden: bool) {
        self.batter_mut(&delivery.striker);
        self.batter_mut(&delivery.non_striker);

        let striker = self.batter_mut(&delivery.striker);
        striker.runs += u32::from(delivery.runs_off_bat);
        if delivery.counts_as_ball_faced() {
            striker.balls += 1;
        }
        match delivery.runs_off_bat {
            4 => striker.fours += 1,
            6 => striker.sixes += 1,
            _ => {}
        }

        let bowler = self.bowler_mut(&delivery.bowler);
        bowler.runs_conceded += delivery.bowler_runs();
        if delivery.is_legal() {
            bowler.legal_balls += 1;
        }
        match delivery.extra {
            ExtraType::Wide => bowler.wides += 1,
            ExtraType::NoBall => bowler.no_balls += 1,
            _ => {}
        }
        if closes_maiden {
            bowler.maidens += 1;
        }

        let extra_runs = u32::from(delivery.extra_runs);
        match delivery.extra {
            ExtraType::None => {}
            ExtraType::Wide => self.extras.wides += extra_runs,
            ExtraType::NoBall => self.extras.no_balls += extra_runs,
            ExtraType::Bye => self.extras.byes += extra_runs,
            ExtraType::LegBye => self.extras.leg_byes += extra_runs,
        }

        let needs_new_partnership = self
            .partnerships
            .last()
            .map(|p| !p.involves_pair(&delivery.striker, &delivery.non_striker))
            .unwrap_or(true);
        if needs_new_partnership {
            self.partnerships.push(Partnership {
                batters: (delivery.striker.clone(), delivery.non_striker.clone()),
                ..Partnership::default()
            });
        }
        if let Some(partnership) = self.partnerships.last_mut() {
            partnership.runs += delivery.total_runs();
            if delivery.is_legal() {
                partnership.balls += 1;
            }
        }

        if let Some(wicket) = &delivery.wicket {
            let dismissal = Dismissal {
                kind: wicket.kind,
                bowler: delivery.bowler.clone(),
                fielder: wicket.fielder.clone(),
            };
            self.batter_mut(&wicket.batter).dismissal = Some(dismissal);
            if wicket.kind.credited_to_bowler() {
                self.bowler_mut(&delivery.bowler).wickets += 1;
            }
        }
    }

    pub fn batter(&self, id: &str) -> Option<&BattingLine> {
        self.batting.iter().find(|b| b.player == id)
    }

    pub fn bowler(&self, id: &str) -> Option<&BowlingLine> {
        self.bowling.iter().find(|b| b.player == id)
    }

    pub fn current_partnership(&self) -> Option<&Partnership> {
        self.partnerships.last()
    }

    fn batter_mut(&mut self, id: &str) -> &mut BattingLine {
        let idx = match self.batting.iter().position(|b| b.player == id) {
            Some(idx) => idx,
            None => {
                self.batting.push(BattingLine::new(id));
                self.batting.len() - 1
            }
        };
        &mut self.batting[idx]
    }

    fn bowler_mut(&mut self, id: &str) -> &mut BowlingLine {
        let idx = match self.bowling.iter().position(|b| b.player == id) {
            Some(idx) => idx,
            None => {
                self.bowling.push(BowlingLine::new(id));
                self.bowling.len() - 1
            }
        };
        &mut self.bowling[idx]
    }
}

// ---------------------------------------------------------------------------
// Derived rates. None instead of dividing by zero.
// ---------------------------------------------------------------------------

pub fn strike_rate(runs: u32, balls_faced: u32) -> Option<f64> {
    (balls_faced > 0).then(|| f64::from(runs) * 100.0 / f64::from(balls_faced))
}

pub fn economy_rate(runs_conceded: u32, legal_balls: u32) -> Option<f64> {
    (legal_balls > 0).then(|| f64::from(runs_conceded) * 6.0 / f64::from(legal_balls))
}

pub fn current_run_rate(runs: u32, legal_balls: u32) -> Option<f64> {
    economy_rate(runs, legal_balls)
}

/// Runs per over needed from the balls left. None once no balls remain.
pub fn required_run_rate(target: u32, runs: u32, balls_remaining: u32) -> Option<f64> {
    if balls_remaining == 0 {
        return None;
    }
    let needed = target.saturating_sub(runs);
    Some(f64::from(needed) * 6.0 / f64::from(balls_remaining))
}

pub fn overs_notation(legal_balls: u32) -> String {
    format!("{}.{}", legal_balls / BALLS_PER_OVER, legal_balls % BALLS_PER_OVER)
}
