//! Rotation handler for AWS Secrets Manager secrets consumed by PostgreSQL
//!
//! Reads one trigger event, runs it, prints the outcome as JSON and exits
//! non-zero when the outcome is FAILED.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use stagehand_rotation::{
    AwsSecretStore, AwsStoreConfig, PostgresConsumer, PostgresConsumerConfig, RequestToken,
    RotationEvent, Rotator, RotatorConfig, SecretId,
};
use tokio::io::AsyncReadExt;

#[derive(Parser)]
#[command(
    name = "stagehand",
    version,
    about = "Staged credential rotation for secrets consumed by PostgreSQL"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a trigger event (full cycle, or the single step it names)
    Rotate(RotateArgs),
    /// Release PENDING held by a stalled token
    Abandon(AbandonArgs),
}

#[derive(Args)]
struct RotateArgs {
    /// File holding the event JSON; stdin when omitted
    #[arg(long, env = "STAGEHAND_EVENT_FILE")]
    event: Option<PathBuf>,
}

#[derive(Args)]
struct AbandonArgs {
    /// Secret whose PENDING version to release
    #[arg(long)]
    secret_id: String,
    /// Token that created the PENDING version
    #[arg(long)]
    token: String,
}

type Handler = Rotator<AwsSecretStore, PostgresConsumer>;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _guard = stagehand_log::auto_init().context("failed to initialize logging")?;
    let cli = Cli::parse();
    let rotator = build_rotator().await?;

    match cli.command {
        Command::Rotate(args) => handle_rotate(&rotator, args).await,
        Command::Abandon(args) => handle_abandon(&rotator, args).await,
    }
}

async fn build_rotator() -> Result<Handler> {
    let config = RotatorConfig::from_env().context("invalid rotation settings")?;
    let store = AwsSecretStore::new(AwsStoreConfig::from_env())
        .await
        .context("failed to set up the secret store client")?;
    let consumer = PostgresConsumer::new(
        PostgresConsumerConfig::from_env().context("invalid PostgreSQL settings")?,
    )?;
    Ok(Rotator::new(store, consumer, config)?)
}

async fn handle_rotate(rotator: &Handler, args: RotateArgs) -> Result<ExitCode> {
    let raw = match &args.event {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("failed to read event from stdin")?;
            raw
        }
    };
    let event = RotationEvent::from_json(&raw)?;
    tracing::debug!(secret_id = %event.secret_id, step = ?event.step, "Received event");

    let outcome = rotator.handle(&event).await;
    println!("{}", serde_json::to_string(&outcome)?);

    Ok(if outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn handle_abandon(rotator: &Handler, args: AbandonArgs) -> Result<ExitCode> {
    let secret_id = SecretId::new(args.secret_id)?;
    let token = RequestToken::new(args.token)?;
    rotator
        .abandon(&secret_id, &token)
        .await
        .with_context(|| format!("failed to abandon {token} on {secret_id}"))?;
    println!("released PENDING of {secret_id} held by {token}");
    Ok(ExitCode::SUCCESS)
}
