mod cache;
mod config;
mod engine;
mod event;
mod fallback;
mod http;
mod lifecycle;
mod queue;
mod router;
mod sync;
#[cfg(test)]
mod testutil;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;

use cache::ServedSource;
use engine::{Engine, Outcome};
use event::{Command, Event};
use http::RequestDescriptor;
use sync::TracingNotifier;

#[derive(Parser, Debug)]
#[command(name = "formsync")]
#[command(about = "An offline-first request router and form submission sync engine")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/formsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
  /// Populate a fresh core cache namespace with the core file set
  Install {
    /// Activate immediately instead of waiting
    #[arg(long)]
    skip_waiting: bool,
  },
  /// Cut over to the configured core version and delete stale namespaces
  Activate,
  /// Route a request through the engine and print how it was served
  Fetch {
    /// Request URL (origin-relative or absolute)
    url: String,
    /// Accept header to classify the request with
    #[arg(long, default_value = "*/*")]
    accept: String,
    /// Request method
    #[arg(long, default_value = "GET")]
    method: String,
  },
  /// Submit a JSON payload to the submission endpoint (queued if offline)
  Submit {
    /// The payload, as a JSON document
    payload: String,
  },
  /// Drain the pending submission queue against the network
  Sync {
    #[arg(long, default_value = "manual")]
    tag: String,
  },
  /// Evict data-namespace entries older than the retention window
  Cleanup {
    #[arg(long, default_value = "manual")]
    tag: String,
  },
  /// Print cache namespaces, their keys, and queue counts
  Info,
  /// List delivered submissions
  History,
  /// Delete every cache namespace
  Clear,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("formsync=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let mut engine = Engine::new(&config, Arc::new(TracingNotifier))?;

  match args.command {
    CliCommand::Install { skip_waiting } => {
      engine.handle(Event::Install { skip_waiting }).await?;
      println!("installed {}", config.core_namespace());
    }
    CliCommand::Activate => {
      engine.handle(Event::Activate).await?;
      println!(
        "active: {} ({:?})",
        config.core_namespace(),
        engine.lifecycle_state()
      );
    }
    CliCommand::Fetch { url, accept, method } => {
      let mut request = RequestDescriptor::get(url).with_header("accept", &accept);
      request.method = method.parse()?;
      if let Outcome::Served(served) = engine.handle(Event::Fetch(request)).await? {
        println!(
          "{} {} ({} bytes)",
          served.response.status,
          source_label(served.source),
          served.response.body.len()
        );
      }
    }
    CliCommand::Submit { payload } => {
      let payload: serde_json::Value = serde_json::from_str(&payload)
        .map_err(|e| color_eyre::eyre::eyre!("Payload is not valid JSON: {}", e))?;
      let request = RequestDescriptor::post(
        config.sync.submission_path.clone(),
        serde_json::to_vec(&payload)?,
      )
      .with_header("content-type", "application/json");

      if let Outcome::Served(served) = engine.handle(Event::Fetch(request)).await? {
        if served.is_fallback() {
          println!("offline: submission queued for replay");
        } else {
          println!("{} {}", served.response.status, source_label(served.source));
        }
      }
    }
    CliCommand::Sync { tag } => {
      if let Outcome::Drained(report) = engine.handle(Event::ConnectivityRestored { tag }).await? {
        println!(
          "attempted {}, delivered {}, remaining {}",
          report.attempted, report.delivered, report.remaining
        );
      }
    }
    CliCommand::Cleanup { tag } => {
      if let Outcome::Cleaned(report) = engine.handle(Event::PeriodicCleanup { tag }).await? {
        println!("scanned {}, evicted {}", report.scanned, report.evicted);
      }
    }
    CliCommand::Info => {
      let (tx, rx) = oneshot::channel();
      engine
        .handle(Event::Command(Command::GetCacheInfo { reply: tx }))
        .await?;
      let info = rx.await?;

      println!("caches: {}", info.total_caches);
      for namespace in &info.caches {
        println!("  {} ({} entries)", namespace.name, namespace.keys.len());
        for key in &namespace.keys {
          println!("    {}", key);
        }
      }

      let (pending, completed) = engine.queue_counts()?;
      println!("queue: {} pending, {} completed", pending, completed);
    }
    CliCommand::History => {
      for submission in engine.completed_submissions()? {
        println!(
          "{}  synced {}  {}  [{}]  {}",
          submission.created_at.format("%Y-%m-%d %H:%M:%S"),
          submission.synced_at.format("%Y-%m-%d %H:%M:%S"),
          submission.id,
          submission.form_type,
          submission.payload
        );
      }
    }
    CliCommand::Clear => {
      let (tx, rx) = oneshot::channel();
      engine
        .handle(Event::Command(Command::ClearCache { reply: tx }))
        .await?;
      if rx.await? {
        println!("all caches cleared");
      } else {
        println!("clear failed; see log for details");
      }
    }
  }

  Ok(())
}

fn source_label(source: ServedSource) -> &'static str {
  match source {
    ServedSource::Network => "network",
    ServedSource::Cache => "cache",
    ServedSource::OfflineCache => "cache (offline)",
    ServedSource::FallbackDocument => "fallback page",
    ServedSource::Synthesized => "synthesized",
  }
}
