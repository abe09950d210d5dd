//! Rule contents consulted when a new rule is added.
//!
//! Rule storage and evaluation live elsewhere; the registry only needs to
//! know whether a rule's path pattern matches a prompt's path and which
//! permissions the rule covers.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::{PromptError, PromptResult};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Glob pattern over absolute paths. `*` stays within one path component,
/// `**` spans any number of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct PathPattern(String);

impl PathPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Match `path` against the pattern.
    pub fn matches(&self, path: &str) -> PromptResult<bool> {
        let compiled = Pattern::new(self.as_str()).map_err(|source| PromptError::InvalidPattern {
            pattern: self.as_str().to_string(),
            source,
        })?;
        Ok(compiled.matches_with(path, MATCH_OPTIONS))
    }
}

/// Path pattern and permissions of a newly added rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleConstraints {
    pub path_pattern: PathPattern,
    pub permissions: Vec<String>,
}

impl RuleConstraints {
    pub fn new(path_pattern: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            path_pattern: PathPattern::new(path_pattern),
            permissions,
        }
    }

    pub fn matches(&self, path: &str) -> PromptResult<bool> {
        self.path_pattern.matches(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_and_glob_patterns() {
        let literal = PathPattern::new("/home/test/file.txt");
        assert!(literal.matches("/home/test/file.txt").unwrap());
        assert!(!literal.matches("/home/test/other.txt").unwrap());

        let single = PathPattern::new("/home/test/*");
        assert!(single.matches("/home/test/file.txt").unwrap());
        assert!(!single.matches("/home/test/dir/file.txt").unwrap());

        let recursive = PathPattern::new("/home/test/**");
        assert!(recursive.matches("/home/test/dir/file.txt").unwrap());
        assert!(recursive.matches("/home/test/.hidden").unwrap());
    }

    #[test]
    fn test_malformed_pattern() {
        let broken = RuleConstraints::new("/home/test/[", vec!["read".to_string()]);
        assert!(matches!(
            broken.matches("/home/test/x"),
            Err(PromptError::InvalidPattern { ref pattern, .. }) if pattern == "/home/test/["
        ));
        assert_eq!(broken.path_pattern.as_str(), "/home/test/[");
    }
}
