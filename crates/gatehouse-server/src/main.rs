//! gatehouse server binary.
//!
//! Reads `gatehouse.toml` (or the path given with `--config`), layers
//! `GATEHOUSE_*` environment variables over it, opens the SQLite store and
//! serves the API and realtime channel over HTTP.
//!
//! # Session token digests
//!
//! Sessions are issued by the identity system, which stores only the digest
//! of each bearer token. To compute one by hand:
//!
//! ```
//! cargo run -p gatehouse-server -- --hash-token
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use gatehouse_api::{AppState, auth::token_digest};
use gatehouse_server::ServerConfig;
use gatehouse_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Gatehouse access control server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "gatehouse.toml")]
  config: PathBuf,

  /// Print the SHA-256 digest of a session token read from stdin and exit.
  #[arg(long)]
  hash_token: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_token {
    let token = read_token()?;
    println!("{}", token_digest(&token));
    return Ok(());
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("GATEHOUSE").try_parsing(true))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }

  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let state = AppState::new(store, server_cfg.api_options());
  let app = gatehouse_server::app(state);
  let address = server_cfg.address();

  tracing::info!(
    sos_dedup_window_secs = ?server_cfg.sos_dedup_window_secs,
    credential_max_age_secs = ?server_cfg.credential_max_age_secs,
    "Listening on http://{address}"
  );
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Read one token line from stdin.
fn read_token() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Token: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim().to_string())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
