use crate::ingestion::{descriptor_text, ToolDefinition};
use sha2::{Digest, Sha256};

/// SHA-256 (hex) over the sorted descriptor texts of `tools`.
///
/// Independent of input order. Two tool sets with the same fingerprint are
/// treated as identical for caching purposes.
pub fn fingerprint(tools: &[ToolDefinition]) -> String {
    let texts: Vec<String> = tools.iter().map(descriptor_text).collect();
    fingerprint_texts(texts.iter().map(String::as_str))
}

/// Fingerprint of already-rendered descriptor texts.
pub fn fingerprint_texts<'a, I>(texts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut sorted: Vec<&str> = texts.into_iter().collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for text in sorted {
        hasher.update(text.as_bytes());
        hasher.update(b"\n");
    }

    format!("{:x}", hasher.finalize())
}
