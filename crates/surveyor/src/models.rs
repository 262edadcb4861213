//! Model-group alias resolution.
//!
//! Blueprint model lists mix concrete identifiers with symbolic group
//! aliases (`CORE`, `QUICK`, ...). Aliases expand against a catalogue kept
//! in the configuration source at a known path. Resolution is pure and
//! deterministic for a given catalogue version; an unreachable catalogue
//! fails loudly so the scheduler skips the blueprint for the tick rather
//! than running a partial model set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::blueprint::ModelRef;
use crate::error::{Error, Result};
use crate::source::ConfigSource;

/// Catalogue path inside the configuration source.
pub const MODEL_CATALOG_PATH: &str = "models/model_catalog.json";

/// The model-group catalogue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Group alias → concrete model identifiers.
    pub groups: BTreeMap<String, Vec<String>>,
}

impl ModelCatalog {
    /// Fetch and parse the catalogue from the configuration source.
    ///
    /// # Errors
    ///
    /// Any fetch or parse failure is a [`Error::ModelResolution`]: alias
    /// expansion without a catalogue would silently change which models a
    /// blueprint runs against.
    pub async fn fetch(source: &dyn ConfigSource) -> Result<Self> {
        let raw = source
            .fetch_file(MODEL_CATALOG_PATH)
            .await
            .map_err(|e| Error::ModelResolution(format!("catalogue unreachable: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::ModelResolution(format!("catalogue unparsable: {e}")))
    }

    /// Look up a group alias, case-insensitively.
    #[must_use]
    pub fn group(&self, alias: &str) -> Option<&[String]> {
        let wanted = alias.to_uppercase();
        self.groups
            .iter()
            .find(|(name, _)| name.to_uppercase() == wanted)
            .map(|(_, members)| members.as_slice())
    }

    /// Expand a model reference list to concrete identifiers,
    /// order-preserving and deduplicated.
    ///
    /// Unknown aliases are dropped with a warning; the caller decides what
    /// an empty result means (the scheduler skips the blueprint).
    #[must_use]
    pub fn resolve(&self, refs: &[ModelRef]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |id: &str| {
            if !out.iter().any(|existing| existing == id) {
                out.push(id.to_string());
            }
        };

        for model_ref in refs {
            match model_ref {
                ModelRef::Concrete { id, .. } => push(id),
                ModelRef::Symbolic(alias) => match self.group(alias) {
                    Some(members) => members.iter().for_each(|id| push(id)),
                    None => {
                        tracing::warn!(alias = %alias, "unknown model group alias, dropping");
                    }
                },
            }
        }
        out
    }
}

/// Strip provider routing from a model id, leaving the base model id used
/// for per-model aggregation (`openrouter:openai/gpt-4o` → `openai/gpt-4o`).
#[must_use]
pub fn base_model_id(model_id: &str) -> String {
    match model_id.split_once(':') {
        Some((_, rest)) if !rest.is_empty() => rest.to_string(),
        _ => model_id.to_string(),
    }
}
