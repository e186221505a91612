use std::time::Duration;

use anyhow::Context;
use reqwest::Url;
use serde::Serialize;

use crate::report::BackupReport;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize, Debug)]
struct Notification<'a> {
    title: String,
    payload: &'a BackupReport,
}

/// POST the run report to a webhook.
pub async fn send_report(url: &Url, report: &BackupReport) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(NOTIFY_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    client
        .post(url.clone())
        .json(&Notification {
            title: report.title(),
            payload: report,
        })
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?
        .error_for_status()
        .with_context(|| format!("Webhook {url} rejected the report"))?;
    Ok(())
}
