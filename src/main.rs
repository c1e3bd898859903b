mod archiver;
mod messages;
mod session;
mod settings;

use crate::archiver::Archiver;
use crate::settings::Settings;
use anyhow::Context;
use cricket_engine::{Commentator, MatchConfig, ScoringEngine, TemplateTable};
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if handle_cli_args() {
        return Ok(());
    }

    better_panic::install();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Arc::new(Settings::load()?);

    let table = match &settings.commentary {
        Some(path) => load_commentary(path)?,
        None => TemplateTable::default(),
    };
    let engine = Arc::new(ScoringEngine::new(Commentator::new(table), settings.channel_capacity));

    if let Some(path) = &settings.fixtures {
        let loaded = load_fixtures(&engine, path)?;
        info!("loaded {loaded} fixtures from {}", path.display());
    }

    // Archive sweep thread
    let archiver = Archiver::new(engine.clone(), settings.archive_after);
    let archiver_task = tokio::spawn(archiver.run());

    let listener = TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("could not bind {}", settings.bind))?;
    info!("crease listening on {}", settings.bind);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept failed: {e}");
                        continue;
                    }
                };
                let engine = engine.clone();
                let settings = settings.clone();
                tokio::spawn(async move {
                    if let Err(e) = session::handle_client(stream, peer, engine, settings).await {
                        error!("client {peer} dropped: {e:#}");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    archiver_task.abort();
    Ok(())
}

fn load_commentary(path: &Path) -> anyhow::Result<TemplateTable> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("could not read commentary table {}", path.display()))?;
    TemplateTable::from_json(&json).with_context(|| format!("invalid commentary table {}", path.display()))
}

/// Register every match in a JSON array of match configurations. A fixture
/// that fails validation is skipped with a warning.
fn load_fixtures(engine: &ScoringEngine, path: &Path) -> anyhow::Result<usize> {
    let json = std::fs::read_to_string(path).with_context(|| format!("could not read fixtures {}", path.display()))?;
    let configs: Vec<MatchConfig> =
        serde_json::from_str(&json).with_context(|| format!("invalid fixtures {}", path.display()))?;

    let mut loaded = 0;
    for config in configs {
        let id = config.id.clone();
        match engine.create_match(config) {
            Ok(_) => loaded += 1,
            Err(e) => warn!("skipping fixture {id}: {e}"),
        }
    }
    Ok(loaded)
}

fn handle_cli_args() -> bool {
    let mut args = std::env::args().skip(1);
    let Some(arg) = args.next() else {
        return false;
    };

    match arg.as_str() {
        "-h" | "--help" => {
            println!("{}", usage_text());
            true
        }
        "-V" | "--version" => {
            println!("crease {}", env!("CARGO_PKG_VERSION"));
            true
        }
        _ => {
            eprintln!("Unknown argument: {arg}\n\n{}", usage_text());
            std::process::exit(2);
        }
    }
}

fn usage_text() -> &'static str {
    "crease - live ball-by-ball cricket scoring server

Usage:
  crease
  crease --help
  crease --version

Environment:
  CREASE_BIND                 Listen address (default 0.0.0.0:8787)
  CREASE_CHANNEL_CAPACITY     Envelopes a viewer may fall behind before it is dropped (default 256)
  CREASE_SEND_TIMEOUT_MS      Per-attempt socket write timeout (default 2000)
  CREASE_SEND_RETRIES         Write attempts before a session is closed (default 3)
  CREASE_ARCHIVE_AFTER_SECS   Grace period before finished matches are archived (default 900)
  CREASE_FIXTURES             JSON file of match configurations to load at startup
  CREASE_COMMENTARY           JSON commentary template table
  RUST_LOG                    Log filter (default info)"
}
