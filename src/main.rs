use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use courier::cache::Method;
use courier::client::ApiResponse;
use courier::offline::ConnectivityFlag;
use courier::{logging, Config};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Cached, retrying HTTP client for JSON backends")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/courier/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Treat the backend as unreachable: writes go to the offline queue
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// GET an endpoint
  Get { endpoint: String },
  /// POST a JSON body
  Post {
    endpoint: String,
    #[arg(short, long)]
    body: Option<String>,
  },
  /// PUT a JSON body
  Put {
    endpoint: String,
    #[arg(short, long)]
    body: Option<String>,
  },
  /// DELETE an endpoint
  Delete { endpoint: String },
  /// Inspect the offline write queue
  Queue {
    #[command(subcommand)]
    action: QueueAction,
  },
}

#[derive(Subcommand, Debug)]
enum QueueAction {
  /// List queued writes
  List,
  /// Drop every queued write
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let connectivity = Arc::new(ConnectivityFlag::new(!args.offline));
  let client = config.client_builder()?.connectivity(connectivity).build()?;

  let (method, endpoint, body) = match args.command {
    Command::Get { endpoint } => (Method::Get, endpoint, None),
    Command::Post { endpoint, body } => (Method::Post, endpoint, body),
    Command::Put { endpoint, body } => (Method::Put, endpoint, body),
    Command::Delete { endpoint } => (Method::Delete, endpoint, None),
    Command::Queue { action } => {
      let queue = client.offline_queue();
      match action {
        QueueAction::List => {
          for op in queue.pending()? {
            println!(
              "{}\t{}\t{} {}\t{}",
              op.id,
              op.queued_at.to_rfc3339(),
              op.method,
              op.endpoint,
              op.body.as_deref().unwrap_or("")
            );
          }
        }
        QueueAction::Clear => {
          let removed = queue.clear()?;
          println!("Removed {} queued write(s)", removed);
        }
      }
      return Ok(());
    }
  };

  let body: Option<Value> = body
    .map(|b| serde_json::from_str(&b).map_err(|e| eyre!("Invalid JSON body: {}", e)))
    .transpose()?;

  match client.request(method, &endpoint, body.as_ref()).await? {
    ApiResponse::Envelope(envelope) => {
      println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    ApiResponse::Binary(payload) => {
      let name = payload
        .filename
        .unwrap_or_else(|| "download.bin".to_string());
      std::fs::write(&name, &payload.bytes)?;
      println!("Saved {} bytes to {}", payload.bytes.len(), name);
    }
  }

  Ok(())
}
