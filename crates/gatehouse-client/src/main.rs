//! `gatehouse`: command-line client for gate operators.
//!
//! # Usage
//!
//! ```
//! gatehouse --url http://localhost:8080 --token <session> scan GATE-7751
//! gatehouse --config ~/.config/gatehouse/config.toml watch
//! ```

mod terminal;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use gatehouse_client::{
  ApiClient, ApiConfig, ClientError,
  escalation::{DEFAULT_POLL_INTERVAL, EscalationController, spawn_poll_backstop},
  realtime::{DEFAULT_RECONNECT_BACKOFF, RealtimeChannel, WebSocketConnector},
  sos::SosReporter,
};
use gatehouse_core::{
  access_log::{AccessMethod, Direction},
  alert::AlertId,
  subject::{StaffId, UserId},
  visit::VisitId,
};
use serde::Deserialize;
use terminal::{TerminalNavigator, TerminalNotifier, TerminalSignal};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gatehouse", about = "Gate operations from the terminal")]
struct Args {
  /// Path to a TOML config file (url, token).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Base URL of the gatehouse server (default: http://localhost:8080).
  #[arg(long, env = "GATEHOUSE_URL")]
  url: Option<String>,

  /// Session bearer token.
  #[arg(long, env = "GATEHOUSE_TOKEN")]
  token: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Resolve a typed access code or scanned QR payload.
  Scan { credential: String },
  /// Admit a visitor.
  CheckIn {
    visit: VisitId,
    #[arg(long)]
    items: Option<String>,
  },
  /// Record a visitor leaving.
  CheckOut {
    visit: VisitId,
    #[arg(long)]
    items: Option<String>,
  },
  /// Turn a visitor away.
  Deny { visit: VisitId },
  /// Start a staff shift.
  ClockIn {
    staff: StaffId,
    #[arg(long)]
    items: Option<String>,
  },
  /// End a staff shift.
  ClockOut {
    staff: StaffId,
    #[arg(long)]
    items: Option<String>,
  },
  /// Log a resident passing the gate.
  LogAccess {
    user: UserId,
    /// entry or exit
    direction: Direction,
    #[arg(long, default_value = "digital_id")]
    method: AccessMethod,
  },
  /// Raise an SOS alert.
  Sos {
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    description: Option<String>,
  },
  /// Register this device's push token.
  PushToken { user: UserId, push_token: String },
  /// Listen for alerts and escalate until acknowledged.
  Watch {
    /// Seconds between open-alert polls.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    poll_secs: u64,
    /// Seconds to wait before reconnecting the realtime channel.
    #[arg(long, default_value_t = DEFAULT_RECONNECT_BACKOFF.as_secs())]
    backoff_secs: u64,
  },
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default)]
struct ConfigFile {
  #[serde(default)]
  url:   String,
  #[serde(default)]
  token: String,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();

  let file_cfg: ConfigFile = if let Some(path) = &args.config {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")?
  } else {
    ConfigFile::default()
  };

  // CLI flags override config file, which overrides defaults.
  let api_config = ApiConfig {
    base_url: args
      .url
      .or_else(|| (!file_cfg.url.is_empty()).then(|| file_cfg.url.clone()))
      .unwrap_or_else(|| "http://localhost:8080".to_string()),
    token:    args
      .token
      .or_else(|| (!file_cfg.token.is_empty()).then(|| file_cfg.token.clone()))
      .ok_or_else(|| anyhow!("no session token; pass --token or set GATEHOUSE_TOKEN"))?,
  };

  let client = ApiClient::new(api_config).context("building HTTP client")?;
  run(client, args.command).await
}

/// Attach the operator-facing remediation to a client error.
fn explain(e: ClientError) -> anyhow::Error { anyhow!("{e}\n{}", e.remediation()) }

async fn run(client: ApiClient, command: Command) -> Result<()> {
  match command {
    Command::Scan { credential } => {
      let subject = client.resolve(&credential).await.map_err(explain)?;
      terminal::print_subject(&subject);
    }
    Command::CheckIn { visit, items } => {
      let visit = client.check_in(visit, items.as_deref()).await.map_err(explain)?;
      terminal::print_visit(&visit);
    }
    Command::CheckOut { visit, items } => {
      let receipt = client.check_out(visit, items.as_deref()).await.map_err(explain)?;
      terminal::print_receipt(&receipt);
    }
    Command::Deny { visit } => {
      let visit = client.deny(visit).await.map_err(explain)?;
      terminal::print_visit(&visit);
    }
    Command::ClockIn { staff, items } => {
      let shift = client.clock_in(staff, items.as_deref()).await.map_err(explain)?;
      terminal::print_visit(&shift);
    }
    Command::ClockOut { staff, items } => {
      let receipt = client.clock_out(staff, items.as_deref()).await.map_err(explain)?;
      terminal::print_receipt(&receipt);
    }
    Command::LogAccess { user, direction, method } => {
      let entry = client.log_access(user, direction, method).await.map_err(explain)?;
      println!(
        "logged {} for resident #{} at {}",
        entry.direction,
        entry.subject_id,
        entry.timestamp.format("%H:%M:%S")
      );
    }
    Command::Sos { location, description } => {
      let reporter = SosReporter::new(client, TerminalNotifier);
      let outcome = reporter
        .raise(location.as_deref(), description.as_deref(), false)
        .await?;
      if outcome.deduplicated {
        println!("alert #{} is already open", outcome.alert.id);
      } else {
        println!("alert #{} raised", outcome.alert.id);
      }
    }
    Command::PushToken { user, push_token } => {
      client.register_push_token(user, &push_token).await.map_err(explain)?;
      println!("push token registered");
    }
    Command::Watch { poll_secs, backoff_secs } => {
      watch(client, Duration::from_secs(poll_secs), Duration::from_secs(backoff_secs)).await?;
    }
  }
  Ok(())
}

// ─── Watch ────────────────────────────────────────────────────────────────────

async fn watch(client: ApiClient, poll: Duration, backoff: Duration) -> Result<()> {
  let url = client.channel_url().map_err(explain)?;
  let channel = RealtimeChannel::with_backoff(WebSocketConnector, url, backoff);
  let controller = Arc::new(EscalationController::new(
    TerminalSignal,
    client.clone(),
    TerminalNavigator,
  ));

  let sink = controller.clone();
  let subscription = channel.subscribe(move |event| sink.handle_event(event));
  channel.connect();

  let cancel = CancellationToken::new();
  let poller = spawn_poll_backstop(controller.clone(), poll, cancel.clone());

  println!("watching for alerts; type an alert id to acknowledge, q to quit");
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      line = lines.next_line() => {
        let Some(line) = line.context("reading stdin")? else { break };
        let line = line.trim();
        if line == "q" {
          break;
        }
        if line.is_empty() {
          continue;
        }
        match line.parse::<AlertId>() {
          Ok(id) => {
            if let Err(e) = controller.acknowledge(id).await {
              eprintln!("{e}\n{}", e.remediation());
            }
          }
          Err(_) => eprintln!("not an alert id: {line}"),
        }
      }
    }
  }

  cancel.cancel();
  controller.shutdown();
  channel.disconnect();
  subscription.unsubscribe();
  poller.await.ok();
  Ok(())
}
