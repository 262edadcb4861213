//! Pipeline-runner seam.
//!
//! The evaluation pipeline (model invocation, grading, artifact save) is
//! an external collaborator. The orchestrator hands it a fully resolved
//! blueprint and receives the filename of the written result artifact;
//! calls may last minutes and the queue imposes no wall-clock limit.

use async_trait::async_trait;

use crate::blueprint::ResolvedBlueprint;
use crate::error::Result;

/// Everything the pipeline needs to execute one evaluation.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// Resolved blueprint (concrete models only).
    pub blueprint: ResolvedBlueprint,
    /// Content hash of the resolved blueprint.
    pub run_label: String,
    /// Evaluation methods to apply.
    pub eval_methods: Vec<String>,
    /// Commit id of the configuration source the blueprint was read at.
    pub commit_sha: Option<String>,
    /// Whether the pipeline may serve model responses from its cache.
    pub use_cache: bool,
}

/// Opaque long-running evaluation pipeline.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Run the evaluation; returns the result artifact's filename (the
    /// basename under the blueprint's result prefix).
    async fn execute(&self, request: PipelineRequest) -> Result<String>;
}
