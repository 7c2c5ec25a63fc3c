//! Published image artifact

use serde::{Deserialize, Serialize};

/// A pushed container image, addressable under every tag it carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Repository without tag, e.g. `docker.io/acme/app`
    pub repository: String,
    /// Tags pushed; always holds the floating alias and the revision id
    pub tags: Vec<String>,
}

impl Artifact {
    /// Full image reference for a tag
    pub fn reference(&self, tag: &str) -> String {
        format!("{}:{}", self.repository, tag)
    }

    pub fn references(&self) -> Vec<String> {
        self.tags.iter().map(|t| self.reference(t)).collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Checks a tag against the registry tag grammar
///
/// `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => {}
        _ => return false,
    }
    tag.len() <= 128 && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references() {
        let artifact = Artifact {
            repository: "ghcr.io/acme/app".to_string(),
            tags: vec!["latest".to_string(), "abc123".to_string()],
        };
        assert_eq!(artifact.reference("latest"), "ghcr.io/acme/app:latest");
        assert_eq!(
            artifact.references(),
            vec!["ghcr.io/acme/app:latest", "ghcr.io/acme/app:abc123"]
        );
        assert!(artifact.has_tag("abc123"));
        assert!(!artifact.has_tag("v1"));
    }

    #[test]
    fn test_tag_grammar() {
        assert!(is_valid_tag("latest"));
        assert!(is_valid_tag("0123abcd"));
        assert!(is_valid_tag("v1.2.3-rc_1"));
        assert!(!is_valid_tag(""));
        assert!(!is_valid_tag("-leading"));
        assert!(!is_valid_tag("has/slash"));
        assert!(!is_valid_tag(&"a".repeat(129)));
    }
}
