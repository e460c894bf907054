//! Redaction primitives: sensitive field names and PII patterns

use crate::config::CustomPatternSettings;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

/// Replacement written over redacted values
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Field names whose values are always redacted
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "access_token",
    "refresh_token",
    "authorization",
    "credit_card",
    "card_number",
    "cvv",
    "ssn",
    "session_id",
    "private_key",
];

#[derive(Debug, Error)]
pub enum RedactionError {
    #[error("Invalid PII pattern `{name}`: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// Built-in PII patterns, applied in this order
struct BuiltinPatterns {
    email: Regex,
    credit_card: Regex,
    ssn: Regex,
    phone: Regex,
}

static PATTERNS: LazyLock<BuiltinPatterns> = LazyLock::new(|| BuiltinPatterns {
    email: Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap(),
    // 4111111111111111, 4111-1111-1111-1111, 4111 1111 1111 1111, 4111.1111.1111.1111
    credit_card: Regex::new(r"\b(?:\d{4}[-. ]?){3}\d{4}\b").unwrap(),
    // 123-45-6789, 123 45 6789, 123.45.6789
    ssn: Regex::new(r"\b\d{3}[-. ]\d{2}[-. ]\d{4}\b").unwrap(),
    // 555-123-4567, (555) 123-4567, +1 555.123.4567, 5551234567
    phone: Regex::new(r"(?:\+?1[-.\s]?)?(?:\(\d{3}\)|\b\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b")
        .unwrap(),
});

/// A finding that was redacted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionFinding {
    /// Pattern name (email, credit_card, ssn, phone, or a custom name)
    pub finding_type: String,
    /// Count of occurrences
    pub count: usize,
}

/// Result of scrubbing one string
#[derive(Debug, Clone)]
pub struct ScrubResult {
    /// The redacted content
    pub content: String,
    /// What was found
    pub findings: Vec<RedactionFinding>,
}

/// A named regular expression
#[derive(Debug, Clone)]
pub struct PiiPattern {
    name: String,
    regex: Regex,
}

impl PiiPattern {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, RedactionError> {
        let name = name.into();
        match Regex::new(pattern) {
            Ok(regex) => Ok(Self { name, regex }),
            Err(source) => Err(RedactionError::InvalidPattern { name, source }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Value scanner for PII: built-in patterns followed by caller-supplied ones
#[derive(Debug, Clone)]
pub struct PiiDetector {
    patterns: Vec<PiiPattern>,
}

impl PiiDetector {
    /// Detector with only the built-in patterns
    pub fn builtin() -> Self {
        let p = &*PATTERNS;
        let named = [
            ("email", &p.email),
            ("credit_card", &p.credit_card),
            ("ssn", &p.ssn),
            ("phone", &p.phone),
        ];
        Self {
            patterns: named
                .into_iter()
                .map(|(name, regex)| PiiPattern {
                    name: name.to_string(),
                    regex: regex.clone(),
                })
                .collect(),
        }
    }

    /// Built-in patterns plus the configured custom ones. Fails on the first pattern that does not compile.
    pub fn with_custom(custom: &[CustomPatternSettings]) -> Result<Self, RedactionError> {
        let mut detector = Self::builtin();
        for settings in custom {
            detector
                .patterns
                .push(PiiPattern::new(settings.name.clone(), &settings.pattern)?);
        }
        Ok(detector)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.name())
    }

    pub fn contains_pii(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.regex.is_match(text))
    }

    /// Replace every match with `marker`, leaving the rest of the text intact.
    /// Returns `None` when nothing matched.
    pub fn scrub(&self, text: &str, marker: &str) -> Option<ScrubResult> {
        let mut content = text.to_string();
        let mut findings = Vec::new();

        for pattern in &self.patterns {
            let count = pattern.regex.find_iter(&content).count();
            if count > 0 {
                content = pattern
                    .regex
                    .replace_all(&content, regex::NoExpand(marker))
                    .into_owned();
                findings.push(RedactionFinding {
                    finding_type: pattern.name.clone(),
                    count,
                });
            }
        }

        if findings.is_empty() {
            None
        } else {
            Some(ScrubResult { content, findings })
        }
    }
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Case-insensitive sensitive field name matcher.
///
/// Names are compared with case, `_`, `-` and spaces removed, so `apiKey`,
/// `API-KEY` and `api_key` are the same field. A key matches when it equals a
/// sensitive name or starts/ends with one (`user_password`, `ssn_last4`).
#[derive(Debug, Clone)]
pub struct SensitiveFields {
    names: Vec<String>,
}

impl SensitiveFields {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = names
            .into_iter()
            .map(|n| normalize(n.as_ref()))
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn matches(&self, key: &str) -> bool {
        let key = normalize(key);
        if key.is_empty() {
            return false;
        }
        self.names
            .iter()
            .any(|name| key == *name || key.starts_with(name.as_str()) || key.ends_with(name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for SensitiveFields {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_FIELDS)
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}
