//! Timestamp canonicalisation.
//!
//! The artifact filename is the one legitimate source of a run's
//! timestamp; `timestamp` fields inside result bodies are advisory only.
//! Filenames carry a "safe" ISO-8601 form with `:` replaced by `-` so the
//! same name works on every filesystem. This module owns the single
//! encode/decode pair and the single filename parser.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Encode a timestamp into its filename-safe form
/// (`2024-05-01T12:30:00.000Z` → `2024-05-01T12-30-00.000Z`).
#[must_use]
pub fn encode_safe_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H-%M-%S%.3fZ").to_string()
}

/// Decode a filename-safe timestamp back to an instant.
#[must_use]
pub fn decode_safe_timestamp(safe: &str) -> Option<DateTime<Utc>> {
    let parsed = NaiveDateTime::parse_from_str(safe, "%Y-%m-%dT%H-%M-%S%.3fZ")
        .or_else(|_| NaiveDateTime::parse_from_str(safe, "%Y-%m-%dT%H-%M-%SZ"))
        .ok()?;
    Some(parsed.and_utc())
}

fn iso_fallback_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    RE.get_or_init(|| {
        Regex::new(r"(\d{4}-\d{2}-\d{2}T\d{2}[:-]\d{2}[:-]\d{2}(?:\.\d+)?Z)").unwrap()
    })
}

/// Extract the canonical timestamp from a result artifact filename of the
/// form `<runLabel>_<safeTimestamp>_comparison.json`.
///
/// Falls back to a regex scan for any embedded ISO timestamp. Returns
/// `None` when nothing parseable is present; such a run is unusable for
/// freshness decisions and counts as absent.
#[must_use]
pub fn timestamp_from_result_filename(file_name: &str) -> Option<DateTime<Utc>> {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);

    if let Some(stripped) = base.strip_suffix("_comparison.json") {
        if let Some((_, safe)) = stripped.split_once('_') {
            if let Some(ts) = decode_safe_timestamp(safe) {
                return Some(ts);
            }
        }
    }

    // Fallback: any ISO-8601 timestamp embedded in the name, with either
    // `:` or the safe `-` separators in the time part.
    let captured = iso_fallback_regex().find(base)?.as_str();
    decode_safe_timestamp(captured).or_else(|| {
        DateTime::parse_from_rfc3339(captured)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn encode_decode_round_trips() {
        let ts = instant();
        assert_eq!(decode_safe_timestamp(&encode_safe_timestamp(ts)), Some(ts));
    }

    #[test]
    fn encode_is_filesystem_safe() {
        assert!(!encode_safe_timestamp(instant()).contains(':'));
    }

    #[test]
    fn parses_canonical_result_filename() {
        let name = format!("abcdef0123456789_{}_comparison.json", encode_safe_timestamp(instant()));
        assert_eq!(timestamp_from_result_filename(&name), Some(instant()));
    }

    #[test]
    fn parses_full_key_paths() {
        let name = format!(
            "live/blueprints/topic__one/abcdef0123456789_{}_comparison.json",
            encode_safe_timestamp(instant())
        );
        assert_eq!(timestamp_from_result_filename(&name), Some(instant()));
    }

    #[test]
    fn falls_back_to_embedded_iso_timestamp() {
        let name = "legacy-run-2024-05-01T12:30:00Z.json";
        assert_eq!(timestamp_from_result_filename(name), Some(instant()));
    }

    #[test]
    fn unusable_names_yield_none() {
        assert_eq!(timestamp_from_result_filename("garbage.json"), None);
        assert_eq!(timestamp_from_result_filename(""), None);
    }
}
