//! HTTP client for the evaluation pipeline service.
//!
//! The pipeline runs as its own service (model invocation and grading are
//! memory-heavy and scale separately). This client implements
//! [`surveyor::PipelineRunner`] by POSTing the resolved blueprint to the
//! pipeline's run endpoint and returning the artifact filename it reports.
//! Calls may last minutes; the request timeout is sized accordingly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use surveyor::constants::DEFAULT_HTTP_CONNECT_TIMEOUT;
use surveyor::{PipelineRequest, PipelineRunner};
use tracing::debug;

/// Generous ceiling for a full pipeline run.
const PIPELINE_TIMEOUT: Duration = Duration::from_secs(45 * 60);

#[derive(Debug, Serialize)]
struct RunBody<'a> {
    blueprint: &'a surveyor::ResolvedBlueprint,
    run_label: &'a str,
    eval_methods: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_sha: Option<&'a str>,
    use_cache: bool,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    file_name: String,
}

/// [`PipelineRunner`] backed by an HTTP pipeline service.
pub struct HttpPipelineRunner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPipelineRunner {
    /// Create a runner against a pipeline service base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PIPELINE_TIMEOUT)
            .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PipelineRunner for HttpPipelineRunner {
    async fn execute(&self, request: PipelineRequest) -> surveyor::Result<String> {
        let config_id = request.blueprint.id.clone();
        let body = RunBody {
            blueprint: &request.blueprint,
            run_label: &request.run_label,
            eval_methods: &request.eval_methods,
            commit_sha: request.commit_sha.as_deref(),
            use_cache: request.use_cache,
        };

        let url = format!("{}/api/pipeline/run", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| surveyor::Error::Pipeline {
                config_id: config_id.clone(),
                reason: format!("pipeline request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(surveyor::Error::Pipeline {
                config_id,
                reason: format!("pipeline returned {}", response.status()),
            });
        }

        let parsed: RunResponse =
            response
                .json()
                .await
                .map_err(|e| surveyor::Error::Pipeline {
                    config_id: config_id.clone(),
                    reason: format!("pipeline response unparsable: {e}"),
                })?;
        debug!(config_id = %config_id, file_name = %parsed.file_name, "pipeline run complete");
        Ok(parsed.file_name)
    }
}
