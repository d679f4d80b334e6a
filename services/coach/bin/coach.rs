//! Runs one voice coaching session from the terminal.
//!
//! Connects with the configured credentials, streams the microphone until the
//! session budget runs out or Ctrl+C is pressed, and exits non-zero if the
//! session failed.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tracing::{info, warn};
use voicecoach_core::{SessionParams, SessionState, StartError};
use voicecoach_service::{
    build_manager,
    config::Config,
    monitor::{failure_report, follow_session},
};

/// Seconds between remaining-time log lines while connected.
const REPORT_EVERY_SECS: u64 = 60;

#[derive(Parser)]
#[command(name = "coach")]
#[command(version, about = "Talk to a realtime voice coach", long_about = None)]
struct Cli {
    /// Coach persona to connect to.
    #[arg(long)]
    coach: String,

    /// BCP-47 language tag for the conversation.
    #[arg(long, default_value_t = String::from("en-US"))]
    locale: String,

    /// Free-form context for the coach, e.g. what to practice.
    #[arg(long)]
    context: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(
        source = ?config.credential_source,
        model = %config.model,
        budget_secs = config.budget.as_secs(),
        "Configuration loaded."
    );

    // --- 3. Connect ---
    let manager = build_manager(&config);
    let follower = tokio::spawn(follow_session(manager.subscribe(), REPORT_EVERY_SECS));

    let mut params = SessionParams::new(cli.coach, cli.locale);
    if let Some(context) = cli.context {
        params = params.with_context(context);
    }

    let started = tokio::select! {
        result = manager.start(params) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted while connecting.");
            Err(StartError::Cancelled)
        }
    };

    // --- 4. Run until the budget expires or the user stops ---
    let final_state = match started {
        Ok(()) => {
            info!("Connected. Press Ctrl+C to end the session.");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C. Ending session...");
                    manager.stop().await;
                }
                _ = wait_for_end(&manager) => {}
            }
            manager.state()
        }
        Err(StartError::Rejected(state)) => {
            warn!(%state, "A session is already running.");
            state
        }
        Err(StartError::Cancelled) => {
            manager.stop().await;
            SessionState::Ended
        }
        Err(StartError::Failed(_)) => manager.state(),
    };

    let error_message = manager.error_message();
    manager.dispose().await;
    follower.abort();

    // --- 5. Report ---
    match final_state {
        SessionState::Error(kind) => {
            let message = error_message.unwrap_or_else(|| kind.to_string());
            eprintln!("{}", failure_report(kind, &message));
            Ok(ExitCode::FAILURE)
        }
        _ => {
            info!("Session finished.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Resolves once the session leaves `Connected` on its own (budget expiry).
async fn wait_for_end(manager: &voicecoach_core::ConnectionManager) {
    let mut rx = manager.subscribe();
    loop {
        if rx.borrow_and_update().state != SessionState::Connected {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
