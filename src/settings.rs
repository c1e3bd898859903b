use anyhow::{Context, bail};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:8787";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind: String,
    /// Envelopes a subscriber may fall behind before it is dropped.
    pub channel_capacity: usize,
    pub send_timeout: Duration,
    pub send_retries: u32,
    pub archive_after: Duration,
    pub fixtures: Option<PathBuf>,
    pub commentary: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            channel_capacity: 256,
            send_timeout: Duration::from_millis(2000),
            send_retries: 3,
            archive_after: Duration::from_secs(900),
            fixtures: None,
            commentary: None,
        }
    }
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let settings = Self {
            bind: var("CREASE_BIND").unwrap_or(defaults.bind),
            channel_capacity: parse(var("CREASE_CHANNEL_CAPACITY"), "CREASE_CHANNEL_CAPACITY")?
                .unwrap_or(defaults.channel_capacity),
            send_timeout: parse(var("CREASE_SEND_TIMEOUT_MS"), "CREASE_SEND_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.send_timeout),
            send_retries: parse(var("CREASE_SEND_RETRIES"), "CREASE_SEND_RETRIES")?
                .unwrap_or(defaults.send_retries),
            archive_after: parse(var("CREASE_ARCHIVE_AFTER_SECS"), "CREASE_ARCHIVE_AFTER_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.archive_after),
            fixtures: var("CREASE_FIXTURES").map(PathBuf::from),
            commentary: var("CREASE_COMMENTARY").map(PathBuf::from),
        };

        if settings.channel_capacity == 0 {
            bail!("CREASE_CHANNEL_CAPACITY must be at least 1");
        }
        if settings.send_retries == 0 {
            bail!("CREASE_SEND_RETRIES must be at least 1");
        }
        Ok(settings)
    }
}

fn parse<T>(value: Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| v.parse::<T>().with_context(|| format!("{key}={v:?} is not a valid number")))
        .transpose()
}
