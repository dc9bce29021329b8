//! Stable field unique names.
//!
//! A name is a readable stem followed by a short digest of the field's
//! structural key, so names survive rule reordering and only change when the
//! path, content type or property change.

/// Number of digest bytes kept in a name.
const DIGEST_BYTES: usize = 6;

/// Structural key of a field, in canonical string form.
pub(crate) fn canonical_key(
    parent: Option<&str>,
    signature: &str,
    content: &str,
    property: Option<&str>,
) -> String {
    format!(
        "{}|{}|{}|{}",
        parent.unwrap_or(""),
        signature,
        content,
        property.unwrap_or("self")
    )
}

/// Unique name for the `ordinal`-th field (zero-based) sharing a key.
pub(crate) fn unique_name(stem: &str, key: &str, ordinal: usize) -> String {
    let hash = blake3::hash(key.as_bytes());
    let digest = hex::encode(&hash.as_bytes()[..DIGEST_BYTES]);
    let stem = sanitize(stem);
    if ordinal == 0 {
        format!("{}_{}", stem, digest)
    } else {
        format!("{}_{}_{}", stem, digest, ordinal + 1)
    }
}

fn sanitize(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "field".to_string()
    } else {
        cleaned
    }
}
