//! Drives the tick endpoint on a fixed interval until the worker reports
//! that it stopped.

use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::{info, warn};

use leadflow_infra::PollerConfig;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickResponse {
    #[serde(default)]
    processed: usize,
    #[serde(default)]
    failed: usize,
    #[serde(default)]
    should_stop: bool,
    message: Option<String>,
}

async fn tick(client: &reqwest::Client, config: &PollerConfig) -> anyhow::Result<TickResponse> {
    let response = client
        .post(&config.tick_url)
        .header("x-cron-secret", &config.cron_secret)
        .send()
        .await
        .context("tick request")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("tick failed with status {status}: {body}");
    }
    response.json().await.context("tick response")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    leadflow_observability::init();

    let config = PollerConfig::from_env().context("loading poller configuration")?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building http client")?;

    info!(url = %config.tick_url, interval_secs = config.interval.as_secs(), "poller started");

    // The first tick fires immediately.
    let mut interval = tokio::time::interval(config.interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                return Ok(());
            }
        }

        match tick(&client, &config).await {
            Ok(report) if report.should_stop => {
                info!(message = report.message.as_deref(), "worker stopped; poller exiting");
                return Ok(());
            }
            Ok(report) => info!(processed = report.processed, failed = report.failed, "tick complete"),
            // Errors never stop the poller; the next interval retries.
            Err(e) => warn!(error = %e, "tick failed"),
        }
    }
}
