use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use docs_offline::{ApiResponse, Config, OfflineClient};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docs-offline")]
#[command(about = "Offline-capable client for a document API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/docs-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API server origin, overriding the config file
  #[arg(long)]
  api_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List one page of documents
  List {
    #[arg(short, long, default_value_t = 1)]
    page: u32,
    /// Field to order by, e.g. -updated_at
    #[arg(short, long)]
    ordering: Option<String>,
  },
  /// Show a document
  Get { id: String },
  /// Create a document
  Create {
    #[arg(short, long)]
    title: Option<String>,
    /// Full JSON body; --title is merged into it
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Partially update a document
  Update {
    id: String,
    #[arg(short, long)]
    body: String,
  },
  /// Delete a document
  Delete { id: String },
  /// Replay queued writes
  Sync,
  /// Show cached and queued state
  Status,
  /// Drop everything stored offline
  Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref(), args.api_url.as_deref())?;
  let _log_guard = init_logging(&config)?;

  let client = OfflineClient::new(&config)?;

  match args.command {
    Command::List { page, ordering } => {
      let query: Vec<(&str, &str)> = ordering
        .as_deref()
        .map(|field| ("ordering", field))
        .into_iter()
        .collect();
      print_response(&client.list_documents(page, &query).await)
    }
    Command::Get { id } => print_response(&client.get_document(&id).await?),
    Command::Create { title, body } => {
      let mut body = match body {
        Some(raw) => parse_object(&raw)?,
        None => json!({}),
      };
      if let (Some(title), Some(fields)) = (title, body.as_object_mut()) {
        fields.insert("title".to_string(), Value::String(title));
      }
      print_response(&client.create_document(&body).await)
    }
    Command::Update { id, body } => {
      let body = parse_object(&body)?;
      print_response(&client.update_document(&id, &body).await?)
    }
    Command::Delete { id } => print_response(&client.delete_document(&id).await?),
    Command::Sync => {
      let remaining = client.sync().await?;
      println!("{} write(s) still queued", remaining);
      Ok(())
    }
    Command::Status => {
      println!("{}", serde_json::to_string_pretty(&client.status()?)?);
      Ok(())
    }
    Command::Purge => {
      client.purge()?;
      println!("Offline store purged");
      Ok(())
    }
  }
}

/// Log to a file next to the store; RUST_LOG wins over the configured filter.
fn init_logging(config: &Config) -> Result<WorkerGuard> {
  let dir = config.log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::never(&dir, "docs-offline.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.log.filter))
    .map_err(|e| eyre!("Invalid log filter {:?}: {}", config.log.filter, e))?;

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn parse_object(raw: &str) -> Result<Value> {
  let value: Value = serde_json::from_str(raw).map_err(|e| eyre!("Invalid JSON body: {}", e))?;
  if !value.is_object() {
    return Err(eyre!("JSON body must be an object"));
  }
  Ok(value)
}

fn print_response(response: &ApiResponse) -> Result<()> {
  println!("{}", response.status);
  match response.json_body() {
    Ok(Some(body)) => println!("{}", serde_json::to_string_pretty(&body)?),
    Ok(None) => {}
    Err(_) => println!("{}", String::from_utf8_lossy(&response.body)),
  }
  Ok(())
}
