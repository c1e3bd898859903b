//! Template-driven commentary lines.
//!
//! A `TemplateTable` is plain configuration: it never changes after load, and
//! all randomness comes from the caller's RNG so output can be pinned down in
//! tests.

use crate::processor::ProcessedEvent;
use crate::{Delivery, DismissalKind, ExtraType};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Used when even the dot-ball set is empty.
const LAST_RESORT: &str = "No run.";
const DEFAULT_ZONE: &str = "the outfield";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateTable {
    pub wicket: HashMap<DismissalKind, Vec<String>>,
    pub six: Vec<String>,
    pub four: Vec<String>,
    pub extras: HashMap<ExtraType, Vec<String>>,
    pub runs: Vec<String>,
    pub dot: Vec<String>,
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for TemplateTable {
    fn default() -> Self {
        let wicket = HashMap::from([
            (
                DismissalKind::Bowled,
                lines(&["OUT! Bowled him! {bowler} knocks back the stumps of {batter}.", "Timber! {batter} is bowled."]),
            ),
            (
                DismissalKind::Caught,
                lines(&["OUT! {batter} picks out the fielder at {zone}.", "Caught! {bowler} gets {batter} to hole out."]),
            ),
            (DismissalKind::Lbw, lines(&["OUT! Plumb in front, {batter} is lbw to {bowler}."])),
            (DismissalKind::RunOut, lines(&["OUT! Run out! {batter} is short of the crease."])),
            (DismissalKind::Stumped, lines(&["OUT! Stumped! {batter} was down the track and missed it."])),
        ]);
        let extras = HashMap::from([
            (ExtraType::Wide, lines(&["Wide. {bowler} strays down the leg side, {runs} added."])),
            (ExtraType::NoBall, lines(&["No-ball! {bowler} overstepped, free hit to follow."])),
            (ExtraType::Bye, lines(&["Byes. Beats everyone, {runs} to the total."])),
            (ExtraType::LegBye, lines(&["Leg-bye. Off the pad towards {zone}, {runs} taken."])),
        ]);
        Self {
            wicket,
            six: lines(&["SIX! {batter} launches it over {zone}.", "Massive hit from {batter}, that's six!"]),
            four: lines(&["FOUR! {batter} drives it through {zone}.", "Cracking shot, four runs to {zone}."]),
            extras,
            runs: lines(&["{batter} works it to {zone} for {runs}.", "Pushed into {zone}, they take {runs}."]),
            dot: lines(&["Dot ball. {bowler} keeps it tight.", "Defended back to {bowler}."]),
        }
    }
}

impl TemplateTable {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    fn set_for(&self, class: Classification) -> Option<&Vec<String>> {
        let found = match class {
            Classification::Wicket(kind) => self
                .wicket
                .get(&kind)
                .filter(|set| !set.is_empty())
                .or_else(|| self.wicket.get(&DismissalKind::Bowled)),
            Classification::Six => Some(&self.six),
            Classification::Four => Some(&self.four),
            Classification::Extra(extra) => self.extras.get(&extra),
            Classification::Runs => Some(&self.runs),
            Classification::Dot => Some(&self.dot),
        };
        found.filter(|set| !set.is_empty())
    }
}

/// Which template set a delivery draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Wicket(DismissalKind),
    Six,
    Four,
    Extra(ExtraType),
    Runs,
    Dot,
}

pub fn classify(delivery: &Delivery) -> Classification {
    if let Some(wicket) = &delivery.wicket {
        Classification::Wicket(wicket.kind)
    } else if delivery.runs_off_bat == 6 {
        Classification::Six
    } else if delivery.runs_off_bat == 4 {
        Classification::Four
    } else if delivery.extra != ExtraType::None {
        Classification::Extra(delivery.extra)
    } else if delivery.runs_off_bat > 0 {
        Classification::Runs
    } else {
        Classification::Dot
    }
}

/// Pick and fill a template for the ball. Always returns a non-empty line.
pub fn describe<R: Rng + ?Sized>(event: &ProcessedEvent, table: &TemplateTable, rng: &mut R) -> String {
    let class = classify(&event.delivery);
    let template = table
        .set_for(class)
        .or_else(|| table.dot.first().map(|_| &table.dot))
        .and_then(|set| set.choose(rng))
        .map(String::as_str)
        .unwrap_or(LAST_RESORT);

    let line = fill(template, event);
    if line.trim().is_empty() { LAST_RESORT.to_string() } else { line }
}

/// Substitute placeholders in one pass over the template, so text coming
/// from a substitution is never expanded again. Unknown braces are kept.
fn fill(template: &str, event: &ProcessedEvent) -> String {
    let delivery = &event.delivery;
    let runs = delivery.total_runs().to_string();
    let value = |key: &str| match key {
        "runs" => Some(runs.as_str()),
        "zone" => Some(delivery.zone.as_deref().unwrap_or(DEFAULT_ZONE)),
        "batter" => Some(event.dismissed_name.as_deref().unwrap_or(&event.striker_name)),
        "bowler" => Some(event.bowler_name.as_str()),
        _ => None,
    };

    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}').and_then(|close| value(&after[..close]).map(|v| (close, v))) {
            Some((close, v)) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// A template table paired with the RNG used to draw from it.
pub struct Commentator {
    table: TemplateTable,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl Commentator {
    pub fn new(table: TemplateTable) -> Self {
        Self::with_rng(table, StdRng::from_entropy())
    }

    pub fn with_rng(table: TemplateTable, rng: impl RngCore + Send + 'static) -> Self {
        Self { table, rng: Mutex::new(Box::new(rng)) }
    }

    pub fn describe(&self, event: &ProcessedEvent) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        describe(event, &self.table, &mut **rng)
    }
}

impl Default for Commentator {
    fn default() -> Self {
        Self::new(TemplateTable::default())
    }
}

impl fmt::Debug for Commentator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commentator").field("table", &self.table).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::InningsTotals;
    use crate::test_support::delivery;
    use rand::rngs::mock::StepRng;

    fn event(d: Delivery) -> ProcessedEvent {
        ProcessedEvent {
            match_id: "m1".into(),
            dismissed_name: d.wicket.as_ref().map(|_| "Rohit".to_string()),
            delivery: d,
            totals: InningsTotals::default(),
            over_number: 1,
            over_completed: false,
            innings_end: None,
            result: None,
            striker_name: "Rohit".into(),
            bowler_name: "Starc".into(),
        }
    }

    fn first_pick() -> StepRng {
        StepRng::new(0, 0)
    }

    #[test]
    fn wicket_beats_everything_else() {
        let d = delivery(0, ExtraType::Wide, 1, Some(DismissalKind::Stumped));
        assert_eq!(classify(&d), Classification::Wicket(DismissalKind::Stumped));
        assert_eq!(classify(&delivery(6, ExtraType::None, 0, None)), Classification::Six);
        assert_eq!(classify(&delivery(4, ExtraType::None, 0, None)), Classification::Four);
        assert_eq!(classify(&delivery(0, ExtraType::LegBye, 4, None)), Classification::Extra(ExtraType::LegBye));
        assert_eq!(classify(&delivery(3, ExtraType::None, 0, None)), Classification::Runs);
        assert_eq!(classify(&delivery(0, ExtraType::None, 0, None)), Classification::Dot);
    }

    #[test]
    fn placeholders_are_filled() {
        let mut d = delivery(2, ExtraType::None, 0, None);
        d.zone = Some("deep midwicket".into());
        let line = describe(&event(d), &TemplateTable::default(), &mut first_pick());
        assert_eq!(line, "Rohit works it to deep midwicket for 2.");
    }

    #[test]
    fn names_are_not_expanded_twice() {
        let mut ev = event(delivery(2, ExtraType::None, 0, None));
        ev.striker_name = "{bowler} {zone}".into();
        let table = TemplateTable { runs: vec!["{batter} takes {runs} off {bowler}, {nope}".into()], ..TemplateTable::default() };
        let line = describe(&ev, &table, &mut first_pick());
        assert_eq!(line, "{bowler} {zone} takes 2 off Starc, {nope}");
    }

    #[test]
    fn zone_defaults_to_the_outfield() {
        let line = describe(&event(delivery(4, ExtraType::None, 0, None)), &TemplateTable::default(), &mut first_pick());
        assert_eq!(line, "FOUR! Rohit drives it through the outfield.");
    }

    #[test]
    fn hit_wicket_uses_bowled_lines() {
        let d = delivery(0, ExtraType::None, 0, Some(DismissalKind::HitWicket));
        let line = describe(&event(d), &TemplateTable::default(), &mut first_pick());
        assert_eq!(line, "OUT! Bowled him! Starc knocks back the stumps of Rohit.");
    }

    #[test]
    fn empty_set_falls_back_to_dot() {
        let table = TemplateTable { six: Vec::new(), ..TemplateTable::default() };
        let line = describe(&event(delivery(6, ExtraType::None, 0, None)), &table, &mut first_pick());
        assert_eq!(line, "Dot ball. Starc keeps it tight.");
    }

    #[test]
    fn empty_table_still_says_something() {
        let table = TemplateTable {
            wicket: HashMap::new(),
            six: Vec::new(),
            four: Vec::new(),
            extras: HashMap::new(),
            runs: Vec::new(),
            dot: Vec::new(),
        };
        let line = describe(&event(delivery(1, ExtraType::None, 0, None)), &table, &mut first_pick());
        assert_eq!(line, LAST_RESORT);

        let table = TemplateTable { dot: vec!["   ".into()], ..table };
        let line = describe(&event(delivery(0, ExtraType::None, 0, None)), &table, &mut first_pick());
        assert_eq!(line, LAST_RESORT);
    }

    #[test]
    fn partial_json_table_keeps_defaults_elsewhere() {
        let table = TemplateTable::from_json(r#"{"six": ["{batter} clears {zone}!"]}"#).unwrap();
        assert_eq!(table.six, vec!["{batter} clears {zone}!".to_string()]);
        assert!(table.wicket.contains_key(&DismissalKind::Caught));

        let table = TemplateTable::from_json(r#"{"extras": {"no_ball": ["Overstep."]}}"#).unwrap();
        assert_eq!(table.extras[&ExtraType::NoBall], vec!["Overstep.".to_string()]);
    }

    #[test]
    fn every_classification_is_non_empty_with_random_picks() {
        let commentator = Commentator::with_rng(TemplateTable::default(), StdRng::seed_from_u64(7));
        let balls = [
            delivery(0, ExtraType::None, 0, Some(DismissalKind::RetiredHurt)),
            delivery(0, ExtraType::None, 0, Some(DismissalKind::Caught)),
            delivery(6, ExtraType::None, 0, None),
            delivery(0, ExtraType::NoBall, 1, None),
            delivery(0, ExtraType::Bye, 2, None),
            delivery(1, ExtraType::None, 0, None),
            delivery(0, ExtraType::None, 0, None),
        ];
        for _ in 0..20 {
            for d in &balls {
                let line = commentator.describe(&event(d.clone()));
                assert!(!line.trim().is_empty());
                assert!(!line.contains('{'), "unfilled placeholder in {line:?}");
            }
        }
    }
}
