use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tokio::io::{self, AsyncWriteExt};
use tracing::debug;

use crate::{
    api::SubmitResponse,
    cli::{ClientArgs, ClientCommand},
    model::SubmissionRecord,
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let client = ApiClient::new(&args.api_url);
    match args.command {
        ClientCommand::Submit { index } => {
            client.submit(&index).await?;
            write_stdout(&format!("*** submitted index {index}")).await?;
        }
        ClientCommand::Current => {
            let values = client.current().await?;
            for line in render_current(&values) {
                write_stdout(&line).await?;
            }
        }
        ClientCommand::All => {
            let records = client.all().await?;
            write_stdout(&render_all(&records)).await?;
        }
    }
    Ok(())
}

/// Thin typed wrapper over the HTTP surface.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Posts `raw` as the index: a JSON number when it looks like one,
    /// otherwise the string as typed, leaving validation to the api.
    pub async fn submit(&self, raw: &str) -> Result<SubmitResponse> {
        let index = raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(raw));

        let response = self
            .http
            .post(self.url("/values"))
            .json(&json!({ "index": index }))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            return Err(anyhow!("api rejected index {raw} ({status}): {message}"));
        }

        debug!(%status, "submission accepted");
        Ok(response.json().await?)
    }

    pub async fn current(&self) -> Result<BTreeMap<String, String>> {
        self.get_json("/values/current").await
    }

    pub async fn all(&self) -> Result<Vec<SubmissionRecord>> {
        self.get_json("/values/all").await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base_url))?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

fn render_current(values: &BTreeMap<String, String>) -> Vec<String> {
    if values.is_empty() {
        return vec!["*** no values calculated yet".to_string()];
    }
    // Keys arrive as strings; order them numerically for display.
    let mut entries: Vec<_> = values.iter().collect();
    entries.sort_by_key(|(index, _)| index.parse::<u64>().unwrap_or(u64::MAX));
    entries
        .into_iter()
        .map(|(index, value)| format!("index {index}: {value}"))
        .collect()
}

fn render_all(records: &[SubmissionRecord]) -> String {
    if records.is_empty() {
        return "*** no indexes submitted yet".to_string();
    }
    let numbers: Vec<_> = records
        .iter()
        .map(|record| record.number.to_string())
        .collect();
    format!("indexes seen: {}", numbers.join(", "))
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
