//! Content fingerprints used as the dedup key and storage identity.
//!
//! A fingerprint is the SHA-256 digest of a chunk's *normalized* text,
//! hex encoded. Normalization collapses every run of whitespace into a
//! single space and trims the ends, so a re-fetch that only reflows
//! whitespace hashes identically. Case folding is optional.
//!
//! ```rust
//! use chatvat_core::fingerprint::{fingerprint, NormalizeOptions};
//!
//! let opts = NormalizeOptions::default();
//! let a = fingerprint("Day 1  opening\nceremony", &opts);
//! let b = fingerprint("Day 1 opening ceremony ", &opts);
//! assert_eq!(a, b);
//! assert_eq!(a.as_str().len(), 64);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of normalized chunk text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already-computed hex digest (e.g. read back from storage).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalization knobs applied before hashing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Lowercase text before hashing.
    pub case_fold: bool,
}

/// Collapse whitespace runs to one space, trim, and optionally lowercase.
pub fn normalize(text: &str, opts: &NormalizeOptions) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    if opts.case_fold {
        out = out.to_lowercase();
    }
    out
}

/// Compute the fingerprint of `text` after normalization.
pub fn fingerprint(text: &str, opts: &NormalizeOptions) -> Fingerprint {
    let normalized = normalize(text, opts);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        let opts = NormalizeOptions::default();
        assert_eq!(normalize("  a \t b\n\n c  ", &opts), "a b c");
    }

    #[test]
    fn test_normalize_case_fold() {
        let opts = NormalizeOptions { case_fold: true };
        assert_eq!(normalize("Day ONE", &opts), "day one");
    }

    #[test]
    fn test_deterministic() {
        let opts = NormalizeOptions::default();
        assert_eq!(fingerprint("hello", &opts), fingerprint("hello", &opts));
    }

    #[test]
    fn test_known_digest() {
        let opts = NormalizeOptions::default();
        assert_eq!(
            fingerprint("", &opts).as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_reformatted_text_collides() {
        let opts = NormalizeOptions::default();
        let a = fingerprint("Opening ceremony\nat 10 AM.", &opts);
        let b = fingerprint("Opening   ceremony at 10 AM.", &opts);
        assert_eq!(a, b);
    }

    #[test]
    fn test_case_sensitivity_follows_option() {
        let plain = NormalizeOptions::default();
        let folded = NormalizeOptions { case_fold: true };
        assert_ne!(fingerprint("Rust", &plain), fingerprint("rust", &plain));
        assert_eq!(fingerprint("Rust", &folded), fingerprint("rust", &folded));
    }

    #[test]
    fn test_short() {
        let fp = fingerprint("x", &NormalizeOptions::default());
        assert_eq!(fp.short().len(), 12);
        assert!(fp.as_str().starts_with(fp.short()));
    }
}
