//! Blueprint model and parsing.
//!
//! A blueprint is a user-authored YAML or JSON evaluation specification
//! fetched from the configuration source. Parsing is deliberately
//! forgiving about shape (model references may be bare strings or objects,
//! prompts accept a couple of historical field spellings) and strict about
//! identity: the blueprint id is a pure function of the source path, and
//! any `id` field the file itself declares is silently dropped.

use crate::error::{Error, Result};
use crate::tags;
use serde::{Deserialize, Serialize};

/// Delimiter substituted for directory separators when deriving ids.
pub const ID_SEGMENT_DELIMITER: &str = "__";

/// Root directory of blueprint files inside the configuration source.
pub const BLUEPRINT_DIR: &str = "blueprints";

/// Subtree reserved for PR-evaluation blueprints; excluded from discovery.
pub const PR_EVAL_SUBTREE: &str = "blueprints/_pr_evals";

const RECOGNIZED_EXTENSIONS: [&str; 3] = [".yml", ".yaml", ".json"];

/// File format of a blueprint, inferred from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlueprintFormat {
    /// `.yml` / `.yaml`
    Yaml,
    /// `.json`
    Json,
}

impl BlueprintFormat {
    /// Infer the format from a file path, if it carries a recognized
    /// extension.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_lowercase();
        if lower.ends_with(".yml") || lower.ends_with(".yaml") {
            Some(Self::Yaml)
        } else if lower.ends_with(".json") {
            Some(Self::Json)
        } else {
            None
        }
    }
}

/// A model reference as written in a blueprint.
///
/// Authors may write either a symbolic group alias (`"CORE"`, `"QUICK"`)
/// that is expanded against the model catalogue at schedule time, or a
/// concrete model identifier (`"openrouter:openai/gpt-4o"`), optionally as
/// an object carrying per-model options.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModelRef {
    /// A symbolic group alias to be expanded via the catalogue.
    Symbolic(String),
    /// A concrete model identifier, optionally with options.
    Concrete {
        /// Fully qualified model id (`provider:family/variant`).
        id: String,
        /// Free-form per-model options passed through to the pipeline.
        #[serde(skip_serializing_if = "Option::is_none")]
        options: Option<serde_json::Value>,
    },
}

impl ModelRef {
    /// Classify a bare string: identifiers with a provider separator are
    /// concrete, anything else is a symbolic alias.
    #[must_use]
    pub fn from_str_value(value: &str) -> Self {
        if value.contains(':') {
            Self::Concrete {
                id: value.to_string(),
                options: None,
            }
        } else {
            Self::Symbolic(value.to_string())
        }
    }
}

impl<'de> Deserialize<'de> for ModelRef {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Object {
                id: String,
                #[serde(default)]
                options: Option<serde_json::Value>,
            },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => ModelRef::from_str_value(&s),
            Raw::Object { id, options } => ModelRef::Concrete { id, options },
        })
    }
}

/// A chat message inside a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker role (`system`, `user`, `assistant`).
    pub role: String,
    /// Message content.
    pub content: String,
}

/// A reference to a point function with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFunctionRef {
    /// Registered point-function name (e.g. `expected_distribution`).
    #[serde(alias = "fn")]
    pub function: String,
    /// Free-form arguments forwarded to the function.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// A single prompt inside a blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt identifier, unique within the blueprint.
    #[serde(default)]
    pub id: Option<String>,

    /// The prompt text sent to the model.
    #[serde(alias = "promptText", default)]
    pub text: Option<String>,

    /// Optional full message list; supersedes `text` when present.
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Point-function references scoring this prompt.
    #[serde(default)]
    pub points: Vec<PointFunctionRef>,
}

/// Raw on-disk blueprint shape. Only used during parsing; the file's own
/// `id` is captured so it can be explicitly discarded.
#[derive(Debug, Deserialize)]
struct RawBlueprint {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    prompts: Vec<Prompt>,
    #[serde(default)]
    models: Vec<ModelRef>,
    #[serde(default)]
    tags: Vec<String>,
}

/// A parsed, normalised blueprint.
///
/// Invariants established by [`parse_blueprint`]:
/// - `id` is derived from the source path, never from file content
/// - `tags` are normalised (lowercase, collapsed, deduplicated)
/// - `title` is never empty (defaults to the id)
/// - `models` is never empty (defaults to the `CORE` alias)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    /// Derived identifier (path segments joined by `__`).
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Optional longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered prompt list.
    pub prompts: Vec<Prompt>,
    /// Model references (symbolic or concrete).
    pub models: Vec<ModelRef>,
    /// Normalised tag set.
    pub tags: Vec<String>,
}

impl Blueprint {
    /// Whether this blueprint is eligible for scheduled runs.
    #[must_use]
    pub fn is_periodic(&self) -> bool {
        tags::is_periodic(&self.tags)
    }

    /// Whether this blueprint is in the demographic-survey domain.
    #[must_use]
    pub fn is_dtef(&self) -> bool {
        tags::is_dtef(&self.tags)
    }
}

/// A blueprint whose symbolic model-group aliases have been expanded to
/// concrete model identifiers. This is the shape handed to the pipeline
/// runner and the input to run-label hashing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBlueprint {
    /// Derived identifier.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Optional longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered prompt list.
    pub prompts: Vec<Prompt>,
    /// Concrete model identifiers only, order-preserving, deduplicated.
    pub models: Vec<String>,
    /// Normalised tag set.
    pub tags: Vec<String>,
}

impl ResolvedBlueprint {
    /// Whether this blueprint is in the demographic-survey domain.
    #[must_use]
    pub fn is_dtef(&self) -> bool {
        tags::is_dtef(&self.tags)
    }
}

/// Derive a blueprint id from its path inside the configuration source.
///
/// The leading blueprint directory is stripped, directory separators become
/// `__`, and recognized extensions (`.yml`, `.yaml`, `.json`, compounds
/// included) are removed. Pure: equal paths always derive equal ids.
#[must_use]
pub fn config_id_from_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    let relative = trimmed
        .strip_prefix(&format!("{BLUEPRINT_DIR}/"))
        .unwrap_or(trimmed);

    let mut stem = relative.to_string();
    loop {
        let lower = stem.to_lowercase();
        match RECOGNIZED_EXTENSIONS.iter().find(|ext| lower.ends_with(**ext)) {
            Some(ext) => stem.truncate(stem.len() - ext.len()),
            None => break,
        }
    }

    stem.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(ID_SEGMENT_DELIMITER)
}

/// Whether a tree path belongs to the blueprint directory and carries a
/// recognized extension, excluding the reserved PR-evaluation subtree.
#[must_use]
pub fn is_discoverable_blueprint_path(path: &str) -> bool {
    let normalized = path.trim_matches('/');
    normalized.starts_with(&format!("{BLUEPRINT_DIR}/"))
        && !normalized.starts_with(&format!("{PR_EVAL_SUBTREE}/"))
        && BlueprintFormat::from_path(normalized).is_some()
}

/// Parse and normalise a blueprint file.
///
/// # Errors
///
/// Returns [`Error::BlueprintParse`] when the file cannot be decoded and
/// [`Error::ReservedId`] when the derived id starts with `_`.
pub fn parse_blueprint(path: &str, content: &str) -> Result<Blueprint> {
    let format = BlueprintFormat::from_path(path).ok_or_else(|| Error::BlueprintParse {
        path: path.to_string(),
        reason: "unrecognized extension".to_string(),
    })?;

    let raw: RawBlueprint = match format {
        BlueprintFormat::Yaml => {
            serde_yml::from_str(content).map_err(|e| Error::BlueprintParse {
                path: path.to_string(),
                reason: e.to_string(),
            })?
        }
        BlueprintFormat::Json => {
            serde_json::from_str(content).map_err(|e| Error::BlueprintParse {
                path: path.to_string(),
                reason: e.to_string(),
            })?
        }
    };

    let id = config_id_from_path(path);
    if tags::is_reserved(&id) {
        return Err(Error::ReservedId(id));
    }

    if let Some(declared) = raw.id {
        tracing::debug!(path, declared_id = %declared, derived_id = %id, "ignoring file-declared blueprint id");
    }

    let tags = tags::normalize_tags(raw.tags);

    let title = match raw.title {
        Some(t) if !t.trim().is_empty() => t,
        _ => id.clone(),
    };

    let models = if raw.models.is_empty() {
        vec![ModelRef::Symbolic("CORE".to_string())]
    } else {
        raw.models
    };

    Ok(Blueprint {
        id,
        title,
        description: raw.description,
        prompts: raw.prompts,
        models,
        tags,
    })
}
