mod app;
mod cache;
mod config;
mod db;
mod event;
mod kv;
mod logging;
mod net;
mod notify;
mod queue;
mod sync;

use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::cache::ResponseStorage;
use crate::net::{Destination, HttpRequest};
use crate::queue::{BackendChoice, NewAction};
use crate::sync::SubmitOutcome;

#[derive(Parser, Debug)]
#[command(name = "shelf-sync")]
#[command(about = "Offline action queue and response cache for the library client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shelf-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the sync service until interrupted
  Serve,
  /// Queue a request for later delivery
  Enqueue(RequestArgs),
  /// Try a request now, queueing it if the server is unreachable
  Submit(RequestArgs),
  /// Show queued actions
  List {
    /// Print as JSON
    #[arg(long)]
    json: bool,
  },
  /// Remove a queued action by id
  Remove { id: String },
  /// Replay every queued action once
  Drain,
  /// Fetch a URL through the response cache
  Fetch {
    url: String,
    /// Treat as a page load (offline page fallback)
    #[arg(long, conflicts_with = "image")]
    document: bool,
    /// Treat as an image load (fallback icon)
    #[arg(long)]
    image: bool,
  },
  /// Pre-populate the static cache from the asset manifest
  Install,
  /// Delete caches belonging to other versions
  Activate,
  /// List cache buckets and their sizes
  Caches,
}

#[derive(ClapArgs, Debug)]
struct RequestArgs {
  /// Action label, e.g. "borrow" or "return"
  #[arg(short = 't', long = "type")]
  kind: String,
  #[arg(short, long, default_value = "POST")]
  method: String,
  /// Path under the server origin, or an absolute URL
  #[arg(short, long)]
  url: String,
  /// JSON request body
  #[arg(short, long)]
  body: Option<String>,
  /// Extra header as "Name: value"; repeatable
  #[arg(short = 'H', long = "header")]
  headers: Vec<String>,
}

impl RequestArgs {
  fn into_action(self) -> Result<NewAction> {
    let mut headers = BTreeMap::new();
    for raw in &self.headers {
      let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", raw))?;
      headers.insert(name.trim().to_string(), value.trim().to_string());
    }

    let body = match self.body {
      Some(raw) => {
        let value: serde_json::Value =
          serde_json::from_str(&raw).map_err(|e| eyre!("Body is not valid JSON: {}", e))?;
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
          headers.insert("Content-Type".to_string(), "application/json".to_string());
        }
        Some(value)
      }
      None => None,
    };

    Ok(NewAction {
      kind: self.kind,
      url: self.url,
      method: self.method.to_uppercase(),
      headers,
      body,
    })
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.data_dir()?.join("logs"));

  let mut app = app::App::new(config)?;

  match args.command {
    Command::Serve => {
      app.init().await?;
      app.run().await?;
      app.shutdown();
    }
    Command::Enqueue(request) => {
      let action = app.queue().enqueue(request.into_action()?)?;
      println!("{}", action.id);
    }
    Command::Submit(request) => {
      let outcome = sync::submit_or_queue(
        app.transport(),
        app.queue(),
        app.notifier(),
        request.into_action()?,
      )
      .await?;
      match outcome {
        SubmitOutcome::Delivered(envelope) => {
          println!("{}", envelope.message.unwrap_or_else(|| "ok".to_string()))
        }
        SubmitOutcome::Queued(action) => println!("queued {}", action.id),
      }
    }
    Command::List { json } => {
      let actions = app.queue().list_all();
      if json {
        println!("{}", serde_json::to_string_pretty(&actions)?);
      } else {
        match app.backend() {
          BackendChoice::Primary { name } => println!("backend: {}", name),
          BackendChoice::FallbackOnly { reason } => println!("backend: kv ({})", reason),
        }
        for action in actions {
          println!(
            "{}  {:<8} {:<6} {}  {}",
            action.id,
            action.kind,
            action.method,
            action.url,
            action.timestamp.to_rfc3339()
          );
        }
      }
    }
    Command::Remove { id } => app.queue().remove(&id)?,
    Command::Drain => {
      let report = app.drain().await;
      println!(
        "attempted {}, replayed {}, still queued {}",
        report.attempted, report.replayed, report.failed
      );
    }
    Command::Fetch {
      url,
      document,
      image,
    } => {
      let destination = if document {
        Destination::Document
      } else if image {
        Destination::Image
      } else {
        Destination::Other
      };
      let request = HttpRequest::get(&url).with_destination(destination);
      match app.cache().fetch(app.transport(), &request).await {
        Ok(result) => {
          match result.cached_at {
            Some(at) => eprintln!("status {} ({:?}, cached {})", result.data.status, result.source, at),
            None => eprintln!("status {} ({:?})", result.data.status, result.source),
          }
          println!("{}", result.data.text());
        }
        Err(e) => {
          notify::report(
            app.notifier(),
            notify::Notification::new(notify::Level::Error, "Request failed", &e.user_message()),
          );
          return Err(eyre!("{}: {}", url, e));
        }
      }
    }
    Command::Install => {
      let assets = app.config().cache.static_assets.clone();
      let report = app.cache().install(app.transport(), &assets).await;
      println!("cached {} assets, {} failed", report.stored, report.failed.len());
      for (url, reason) in report.failed {
        println!("  {}: {}", url, reason);
      }
    }
    Command::Activate => {
      for name in app.cache().activate()? {
        println!("deleted {}", name);
      }
    }
    Command::Caches => {
      let storage = app.cache().storage();
      for name in storage.cache_names()? {
        println!("{}  {} entries", name, storage.entry_count(&name)?);
      }
    }
  }

  Ok(())
}
