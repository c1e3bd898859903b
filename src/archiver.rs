use cricket_engine::{MatchId, ScoringEngine};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, interval};

/// Archives completed and abandoned matches once they have sat finished for
/// the grace period. Archiving closes every viewer feed for the match.
pub struct Archiver {
    engine: Arc<ScoringEngine>,
    grace: Duration,
    /// When each match was first seen finished. Undo can reopen a match, so
    /// entries disappear again if it goes back to live.
    finished_since: HashMap<MatchId, Instant>,
}

impl Archiver {
    pub fn new(engine: Arc<ScoringEngine>, grace: Duration) -> Self {
        Self { engine, grace, finished_since: HashMap::new() }
    }

    fn sweep_period(&self) -> Duration {
        (self.grace / 4).clamp(Duration::from_secs(1), Duration::from_secs(30))
    }

    pub async fn run(mut self) {
        let mut ticker = interval(self.sweep_period());
        // Nothing can be due on the first tick.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.sweep(Instant::now()).await;
        }
    }

    pub async fn sweep(&mut self, now: Instant) -> Vec<MatchId> {
        let finished = self.engine.finished_matches();
        self.finished_since.retain(|id, _| finished.iter().any(|m| m.id() == id));

        let mut archived = Vec::new();
        for m in finished {
            let since = *self.finished_since.entry(m.id().to_owned()).or_insert(now);
            if now.duration_since(since) < self.grace {
                continue;
            }
            match self.engine.archive(m.id()).await {
                Ok(_) => {
                    info!("archived {} ({})", m.id(), m.status);
                    self.finished_since.remove(m.id());
                    archived.push(m.id().to_owned());
                }
                Err(e) => warn!("could not archive {}: {e}", m.id()),
            }
        }
        archived
    }
}
