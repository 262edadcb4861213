//! Tag normalisation and the reserved tag vocabulary.
//!
//! Tags are free-form strings written by blueprint authors. They enter the
//! system in three places (scheduler input, result ingest, summary
//! building) and are normalised identically at each: lowercased, trimmed,
//! internal whitespace collapsed, deduplicated preserving first occurrence,
//! empties dropped. Normalisation is idempotent.

/// Marks a blueprint as eligible for scheduled runs.
pub const TAG_PERIODIC: &str = "_periodic";

/// Blueprints carrying this tag get full recent-run detail on the homepage.
pub const TAG_FEATURED: &str = "_featured";

/// Excluded from homepage aggregates.
pub const TAG_PUBLIC_API: &str = "_public_api";

/// Demographic-survey evaluation domain; subject to the distribution-metric
/// point function and the per-survey summaries.
pub const TAG_DTEF: &str = "dtef";

/// PR-evaluation provenance marker.
pub const TAG_PR_EVALUATION: &str = "_pr_evaluation";

/// Any tag or id starting with this prefix is system-meaningful.
pub const RESERVED_PREFIX: char = '_';

/// Normalise a single tag: lowercase, trim, collapse internal whitespace.
/// Returns `None` for tags that are empty after trimming.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let collapsed = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Normalise a tag set, deduplicating while preserving first occurrence.
pub fn normalize_tags<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in raw {
        if let Some(normalized) = normalize_tag(tag.as_ref()) {
            if !out.contains(&normalized) {
                out.push(normalized);
            }
        }
    }
    out
}

/// Whether a tag set marks its blueprint as periodic.
pub fn is_periodic(tags: &[String]) -> bool {
    tags.iter().any(|t| t == TAG_PERIODIC)
}

/// Whether a tag set marks its blueprint as featured on the homepage.
pub fn is_featured(tags: &[String]) -> bool {
    tags.iter().any(|t| t == TAG_FEATURED)
}

/// Whether a tag set excludes its blueprint from homepage aggregates.
pub fn is_public_api(tags: &[String]) -> bool {
    tags.iter().any(|t| t == TAG_PUBLIC_API)
}

/// Whether a tag set puts its blueprint in the demographic-survey domain.
pub fn is_dtef(tags: &[String]) -> bool {
    tags.iter().any(|t| t == TAG_DTEF)
}

/// Whether an id (or tag) is reserved for system-injected blueprints.
pub fn is_reserved(value: &str) -> bool {
    value.starts_with(RESERVED_PREFIX)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_whitespace_and_duplicates() {
        let tags = normalize_tags(["Safety", "  safety ", "_PERIODIC", "safety"]);
        assert_eq!(tags, vec!["safety".to_string(), "_periodic".to_string()]);
        assert!(is_periodic(&tags));
    }

    #[test]
    fn collapses_internal_whitespace() {
        assert_eq!(
            normalize_tag("Global   Health \t Survey"),
            Some("global health survey".to_string())
        );
    }

    #[test]
    fn drops_empty_tags() {
        let tags = normalize_tags(["", "   ", "ok"]);
        assert_eq!(tags, vec!["ok".to_string()]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_tags(["Mixed  Case", "mixed case", " DTEF "]);
        let twice = normalize_tags(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn reserved_detection() {
        assert!(is_reserved("_pr_evals__x"));
        assert!(!is_reserved("health__clinical"));
    }
}
