//! Run labels: stable content hashes of resolved blueprints.

use crate::blueprint::ResolvedBlueprint;
use sha2::{Digest, Sha256};

/// Length of the hex run-label prefix carried in artifact filenames.
pub const RUN_LABEL_LEN: usize = 16;

/// Compute the run label for a resolved blueprint.
///
/// The label is the truncated hex SHA-256 of the blueprint's canonical JSON
/// encoding. Equal labels mean equal resolved content: models expanded,
/// tags normalised. The label participates in artifact filenames but is
/// deliberately not used as a freshness test: re-resolving a model-group
/// alias changes the hash without changing the blueprint's intent.
#[must_use]
pub fn run_label(resolved: &ResolvedBlueprint) -> String {
    // Canonical form: serde_json preserves struct field order, and all
    // collections inside ResolvedBlueprint are ordered vectors.
    let canonical = serde_json::to_string(resolved).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut label = hex::encode(digest);
    label.truncate(RUN_LABEL_LEN);
    label
}
