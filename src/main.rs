mod auth;
mod classifier;
mod config;
mod engine;
mod error;
mod gmail;
mod mailbox;
mod models;
mod retry;
#[cfg(test)]
mod testing;

use crate::config::Config;
use crate::engine::{ChallengeEngine, RunSummary};
use crate::gmail::GmailClient;
use crate::mailbox::Mailbox;
use crate::models::LabelSet;
use crate::retry::{RetryPolicy, RetryingMailbox};
use anyhow::Context;
use google_gmail1::Gmail;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_logging(&config)?;
    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Setting up the Gmail service");
    let secret = auth::Authenticator::load_secret(&config.credentials_path).await?;
    let authenticator = auth::Authenticator::authenticate(secret, &config).await?;

    let hub = Gmail::new(
        hyper::Client::builder().build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .context("Failed to load native roots")?
                .https_only()
                .enable_http1()
                .build(),
        ),
        authenticator,
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling the run");
            on_interrupt.cancel();
        }
    });

    let mailbox = RetryingMailbox::new(
        GmailClient::new(hub),
        RetryPolicy::from_settings(&config.retry),
        cancel,
    );

    // A failed run is only logged; the exit status stays the same.
    if let Err(e) = run(mailbox, &config).await {
        tracing::error!("An error occurred: {}", e);
    }
    Ok(())
}

/// One pass of the challenge engine against the configured labels.
async fn run<M: Mailbox>(mailbox: M, config: &Config) -> error::Result<RunSummary> {
    let labels = LabelSet::resolve(&mailbox.list_labels().await?, config)?;
    tracing::debug!(
        "Resolved labels: unchallenged={}, challenged={}, passed={}",
        labels.unchallenged.id,
        labels.challenged.id,
        labels.passed.id
    );

    ChallengeEngine::new(mailbox, labels, config)
        .process_emails()
        .await
}

/// Each run overwrites the log file. `RUST_LOG` wins over `log_level`.
fn init_logging(config: &Config) -> anyhow::Result<()> {
    let file = std::fs::File::create(&config.log_file)
        .with_context(|| format!("Failed to create log file {}", config.log_file.display()))?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("warn,gchallenge={}", config.log_level))
            .with_context(|| format!("Invalid log_level '{}'", config.log_level))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::{CHALLENGED, FakeMailbox, UNCHALLENGED};

    fn config() -> Config {
        Config {
            sender_email: "me@example.com".to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_run_resolves_labels_and_processes() {
        let fake = FakeMailbox::new();
        fake.add_message("T1", "m1", "a@example.com", "Hello", "hi", 1, &[UNCHALLENGED]);

        let summary = run(fake.clone(), &config()).await.unwrap();

        assert_eq!(summary.challenged, 1);
        assert!(fake.has_label("m1", CHALLENGED));
    }

    #[tokio::test]
    async fn test_run_fails_on_unknown_label() {
        let config = Config {
            passed_label: "whitelisted".to_string(),
            ..config()
        };
        let err = run(FakeMailbox::new(), &config).await.unwrap_err();
        assert!(matches!(err, Error::LabelNotFound(name) if name == "whitelisted"));
    }

    #[tokio::test]
    async fn test_run_fails_when_labels_cannot_be_listed() {
        let fake = FakeMailbox::new();
        fake.fail_operation("list_labels");
        assert!(run(fake, &config()).await.is_err());
    }
}
