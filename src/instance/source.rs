//! Instance sources: local files and the HuggingFace datasets server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::ProblemInstance;
use crate::error::InstanceError;

/// Base URL for HuggingFace datasets server rows API.
pub const HUGGINGFACE_ROWS_API: &str = "https://datasets-server.huggingface.co/rows";

/// Rows requested per page; the datasets server caps pages at 100.
const PAGE_SIZE: usize = 100;

/// Maps a subset alias to its dataset path. Unknown names are used verbatim.
pub fn dataset_for_subset(subset: &str) -> &str {
    match subset {
        "full" => "princeton-nlp/SWE-bench",
        "verified" => "princeton-nlp/SWE-bench_Verified",
        "lite" => "princeton-nlp/SWE-bench_Lite",
        other => other,
    }
}

/// Something that yields problem instances.
#[async_trait]
pub trait InstanceSource: Send + Sync {
    /// Human-readable description used in logs.
    fn describe(&self) -> String;

    async fn load(&self) -> Result<Vec<ProblemInstance>, InstanceError>;
}

/// Reads instances from a JSON array or a JSON Lines file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(path: &Path, content: &str) -> Result<Vec<ProblemInstance>, InstanceError> {
        let parse_error = |reason: String| InstanceError::Parse {
            path: path.to_path_buf(),
            reason,
        };

        if content.trim_start().starts_with('[') {
            return serde_json::from_str(content).map_err(|e| parse_error(e.to_string()));
        }

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| parse_error(format!("line {}: {}", n + 1, e)))
            })
            .collect()
    }
}

#[async_trait]
impl InstanceSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<Vec<ProblemInstance>, InstanceError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let instances = Self::parse(&self.path, &content)?;
        info!(path = %self.path.display(), count = instances.len(), "Loaded instances");
        Ok(instances)
    }
}

/// Pages through a dataset split on the HuggingFace datasets server.
pub struct HubSource {
    http_client: Client,
    base_url: String,
    dataset: String,
    split: String,
    token: Option<String>,
}

impl HubSource {
    /// Creates a source for `subset` (an alias or a dataset path) and `split`.
    pub fn new(subset: &str, split: impl Into<String>) -> Result<Self, InstanceError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| InstanceError::Http(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: HUGGINGFACE_ROWS_API.to_string(),
            dataset: dataset_for_subset(subset).to_string(),
            split: split.into(),
            token: None,
        })
    }

    /// Sends the token as a bearer credential (needed for gated datasets).
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    async fn fetch_page(&self, offset: usize) -> Result<RowsResponse, InstanceError> {
        let url = format!(
            "{}?dataset={}&config=default&split={}&offset={}&length={}",
            self.base_url, self.dataset, self.split, offset, PAGE_SIZE
        );

        let mut request = self
            .http_client
            .get(&url)
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InstanceError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(InstanceError::Http(format!(
                "API returned status {}: {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| InstanceError::Http(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl InstanceSource for HubSource {
    fn describe(&self) -> String {
        format!("{} ({})", self.dataset, self.split)
    }

    async fn load(&self) -> Result<Vec<ProblemInstance>, InstanceError> {
        let mut instances = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.fetch_page(offset).await?;
            let fetched = page.rows.len();
            debug!(dataset = %self.dataset, offset, fetched, "Fetched rows page");

            instances.extend(page.rows.into_iter().map(|row| row.row));
            offset += fetched;

            let exhausted = page.num_rows_total.map_or(false, |total| offset >= total);
            if fetched < PAGE_SIZE || exhausted {
                break;
            }
        }

        info!(
            dataset = %self.dataset,
            split = %self.split,
            count = instances.len(),
            "Loaded instances"
        );
        Ok(instances)
    }
}

#[derive(Debug, Deserialize)]
struct RowsResponse {
    rows: Vec<Row>,
    #[serde(default)]
    num_rows_total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Row {
    row: ProblemInstance,
}
