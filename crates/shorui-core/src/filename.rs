//! Artifact filename rules shared by the parser, the store and the server

use chrono::{DateTime, Utc};

use crate::{Result, ShoruiError};

/// MIME type served for generated documents
pub const DOCUMENT_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Extension of generated documents
pub const DOCUMENT_EXTENSION: &str = "docx";

const MAX_FILENAME_LEN: usize = 255;
const MAX_SLUG_LEN: usize = 60;

/// Check that `name` is a bare filename that stays inside a store root.
///
/// Unsafe names are rejected, never repaired.
pub fn validate_filename(name: &str) -> Result<()> {
    let reject = |reason: &str| -> Result<()> {
        Err(ShoruiError::PathValidation(format!("{:?}: {}", name, reason)))
    };

    if name.is_empty() {
        return reject("empty filename");
    }
    if name.len() > MAX_FILENAME_LEN {
        return reject("filename too long");
    }
    if name.contains('/') || name.contains('\\') {
        return reject("contains a path separator");
    }
    if name.contains(':') {
        return reject("contains a drive or volume prefix");
    }
    if name.contains("..") {
        return reject("contains a parent-directory segment");
    }
    if name.starts_with('.') {
        return reject("hidden names are reserved");
    }
    if name.chars().any(|c| c.is_control() || c == '"') {
        return reject("contains a control character or quote");
    }
    Ok(())
}

/// Name used when the model does not choose one
pub fn default_filename(now: DateTime<Utc>) -> String {
    format!("document-{}.{}", now.timestamp_millis(), DOCUMENT_EXTENSION)
}

/// Lower-case ASCII slug of a topic, `-` separated.
///
/// "Business Proposal" becomes "business-proposal". Empty input gives
/// "document".
pub fn slugify(topic: &str) -> String {
    let mut slug = String::with_capacity(topic.len());
    for c in topic.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "document".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_accepts_plain_names() {
        assert!(validate_filename("report.docx").is_ok());
        assert!(validate_filename("business-proposal-doc-a1b2c3.docx").is_ok());
        assert!(validate_filename("Q3 summary (final).docx").is_ok());
    }

    #[test]
    fn test_rejects_traversal_and_separators() {
        for bad in [
            "",
            "../../etc/passwd",
            "a/b.docx",
            "a\\b.docx",
            "C:report.docx",
            "..",
            "report..docx",
            ".scratch",
            ".hidden.docx",
            "bad\nname.docx",
            "quote\".docx",
        ] {
            assert!(
                matches!(validate_filename(bad), Err(ShoruiError::PathValidation(_))),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_default_filename_uses_millis() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(default_filename(now), "document-1700000000123.docx");
        assert!(validate_filename(&default_filename(now)).is_ok());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Business Proposal"), "business-proposal");
        assert_eq!(slugify("  Project   Report!! "), "project-report");
        assert_eq!(slugify("Ünïcode only"), "n-code-only");
        assert_eq!(slugify("!!!"), "document");
        assert_eq!(slugify(""), "document");

        let long = "word ".repeat(40);
        let slug = slugify(&long);
        assert!(slug.len() <= 60);
        assert!(!slug.ends_with('-'));
    }
}
