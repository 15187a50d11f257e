//! Error classification
//!
//! A failure is classified by testing its message (and stack, when present)
//! against an ordered table of case-insensitive pattern sets. The first
//! category with a matching pattern wins.

use once_cell::sync::Lazy;
use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Broad class of a tool failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connectivity problems
    Network,
    /// Missing or unusable files and directories
    FileSystem,
    /// Malformed input the tool could not parse
    Syntax,
    /// Well-formed but rejected input
    Validation,
    /// Operation took too long
    Timeout,
    /// Access denied
    Permission,
    /// Memory, disk or handle exhaustion
    Resource,
    /// Nothing matched
    Unknown,
}

impl ErrorCategory {
    /// Every category, in classification order
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::Network,
        ErrorCategory::FileSystem,
        ErrorCategory::Syntax,
        ErrorCategory::Validation,
        ErrorCategory::Timeout,
        ErrorCategory::Permission,
        ErrorCategory::Resource,
        ErrorCategory::Unknown,
    ];

    /// Snake-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::FileSystem => "file_system",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Network,
        &[
            r"\bnetwork\b",
            r"econn(refused|reset|aborted)",
            r"enotfound",
            r"connection (refused|reset|closed|aborted)",
            r"socket hang up",
            r"fetch failed",
            r"\bdns\b",
            r"host unreachable",
        ],
    ),
    (
        ErrorCategory::FileSystem,
        &[
            r"\benoent\b",
            r"no such file",
            r"file not found",
            r"\beisdir\b",
            r"\benotdir\b",
            r"\beexist\b",
            r"(directory|path) (not found|does not exist)",
        ],
    ),
    (
        ErrorCategory::Syntax,
        &[
            r"syntax ?error",
            r"unexpected (token|end of input|character)",
            r"parse error",
            r"failed to parse",
            r"invalid json",
            r"unterminated",
        ],
    ),
    (
        ErrorCategory::Validation,
        &[
            r"validation",
            r"invalid (argument|parameter|input|value|option)",
            r"(is|are) required",
            r"must be",
            r"out of range",
            r"schema",
        ],
    ),
    (
        ErrorCategory::Timeout,
        &[
            r"time[d]? ?out",
            r"\betimedout\b",
            r"deadline exceeded",
            r"took too long",
        ],
    ),
    (
        ErrorCategory::Permission,
        &[
            r"\beacces\b",
            r"\beperm\b",
            r"permission denied",
            r"access denied",
            r"unauthori[sz]ed",
            r"forbidden",
            r"not permitted",
        ],
    ),
    (
        ErrorCategory::Resource,
        &[
            r"\benomem\b",
            r"out of memory",
            r"\benospc\b",
            r"no space left",
            r"quota",
            r"too many open files",
            r"\bemfile\b",
            r"resource (exhausted|busy|unavailable)",
            r"heap",
        ],
    ),
];

static CLASSIFIER: Lazy<Vec<(ErrorCategory, RegexSet)>> = Lazy::new(|| {
    RULES
        .iter()
        .filter_map(|(category, patterns)| {
            match RegexSetBuilder::new(*patterns).case_insensitive(true).build() {
                Ok(set) => Some((*category, set)),
                Err(e) => {
                    warn!(category = category.as_str(), error = %e, "Skipping invalid error patterns");
                    None
                }
            }
        })
        .collect()
});

/// Classify a failure by its message and optional stack
pub fn categorize_error(message: &str, stack: Option<&str>) -> ErrorCategory {
    let haystack = match stack {
        Some(stack) => format!("{}\n{}", message, stack),
        None => message.to_string(),
    };

    CLASSIFIER
        .iter()
        .find(|(_, set)| set.is_match(&haystack))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_rule_set_compiles() {
        assert_eq!(CLASSIFIER.len(), RULES.len());
    }

    #[test]
    fn test_categories() {
        let cases = [
            ("connect ECONNREFUSED 127.0.0.1:8080", ErrorCategory::Network),
            ("ENOENT: no such file or directory, open 'a.mp4'", ErrorCategory::FileSystem),
            ("SyntaxError: Unexpected token } in JSON", ErrorCategory::Syntax),
            ("Invalid argument: width must be positive", ErrorCategory::Validation),
            ("render timed out after 30s", ErrorCategory::Timeout),
            ("EACCES: permission denied", ErrorCategory::Permission),
            ("JavaScript heap out of memory", ErrorCategory::Resource),
            ("something odd happened", ErrorCategory::Unknown),
        ];

        for (message, expected) in cases {
            assert_eq!(categorize_error(message, None), expected, "{}", message);
        }
    }

    #[test]
    fn test_first_match_wins() {
        // network is checked before timeout
        assert_eq!(
            categorize_error("network request timed out", None),
            ErrorCategory::Network
        );
    }

    #[test]
    fn test_stack_is_searched() {
        assert_eq!(
            categorize_error("tool failed", Some("at open (fs.js:10)\nENOENT")),
            ErrorCategory::FileSystem
        );
    }
}
