//! Secret sanitizer: scrubs secret literals and secret-shaped content.
//!
//! A `SecretSanitizer` holds the literals registered at runtime (every value a
//! secret provider hands out) plus regex rules for common credential shapes.
//! The engine passes one instance through the execution context and runs it
//! over every persisted execution log and every log line.

use std::sync::{Arc, LazyLock, RwLock};

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tessera_types::config::{DEFAULT_REDACTION_MARKER, EngineConfig};
use tessera_types::secret::SecretFinding;

/// Literals shorter than this are ignored; they would redact ordinary text.
pub const MIN_LITERAL_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Pattern rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleMode {
    /// Replace the entire match.
    Whole,
    /// Keep groups 1 and 2 (key and separator), replace group 3 (value).
    Value,
}

#[derive(Debug, Clone)]
struct PatternRule {
    name: String,
    regex: Regex,
    mode: RuleMode,
}

fn rule(name: &str, pattern: &str, mode: RuleMode) -> PatternRule {
    PatternRule {
        name: name.to_string(),
        regex: Regex::new(pattern).expect("built-in secret pattern must compile"),
        mode,
    }
}

static BUILTIN_RULES: LazyLock<Vec<PatternRule>> = LazyLock::new(|| {
    vec![
        rule(
            "private_key",
            r"-----BEGIN [A-Z0-9 ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z0-9 ]*PRIVATE KEY-----",
            RuleMode::Whole,
        ),
        rule(
            "jwt",
            r"\beyJ[A-Za-z0-9_-]{5,}\.[A-Za-z0-9_-]{5,}\.[A-Za-z0-9_-]{5,}",
            RuleMode::Whole,
        ),
        rule(
            "bearer_token",
            r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]{8,}=*",
            RuleMode::Whole,
        ),
        rule(
            "api_key",
            r"\b(?:sk|pk|rk)_(?:live|test)_[A-Za-z0-9]{6,}|\bsk-[A-Za-z0-9_-]{16,}|\bAKIA[0-9A-Z]{16}\b|\bgh[pousr]_[A-Za-z0-9]{20,}|\bxox[abprs]-[A-Za-z0-9-]{10,}",
            RuleMode::Whole,
        ),
        rule(
            "connection_string",
            r"\b[a-zA-Z][a-zA-Z0-9+.-]*://[^:/\s@]+:[^@\s]+@[^\s'\x22]+",
            RuleMode::Whole,
        ),
        rule(
            "credential_assignment",
            r#"(?i)\b(password|passwd|pwd|secret|token|api[_-]?key|access[_-]?key)(\s*[:=]\s*)("[^"]*"|'[^']*'|[^\s,;&]+)"#,
            RuleMode::Value,
        ),
    ]
});

/// Normalized key fragments that mark a credential-bearing field.
const SUSPICIOUS_KEY_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "apikey",
    "privatekey",
    "accesskey",
    "credential",
];

const SUSPICIOUS_KEYS_EXACT: &[&str] = &["auth", "authorization", "pwd"];

/// Whether a key name suggests it carries a credential.
pub fn is_suspicious_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    SUSPICIOUS_KEYS_EXACT.contains(&normalized.as_str())
        || SUSPICIOUS_KEY_FRAGMENTS
            .iter()
            .any(|frag| normalized.contains(frag))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SanitizerError {
    #[error("invalid secret pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

// ---------------------------------------------------------------------------
// SecretSanitizer
// ---------------------------------------------------------------------------

/// Registry of known secret literals plus pattern rules.
///
/// Cheap to share: wrap in `Arc` and hand the same instance to every
/// component of a run. Registration takes `&self`.
#[derive(Debug)]
pub struct SecretSanitizer {
    /// Sorted longest first so overlapping literals redact fully.
    literals: RwLock<Vec<String>>,
    rules: Vec<PatternRule>,
    marker: String,
}

impl Default for SecretSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_REDACTION_MARKER)
    }
}

impl SecretSanitizer {
    /// Create a sanitizer with the built-in rules and the given marker.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            literals: RwLock::new(Vec::new()),
            rules: BUILTIN_RULES.clone(),
            marker: marker.into(),
        }
    }

    /// Add extra whole-match pattern rules (e.g. from configuration).
    pub fn with_patterns(mut self, patterns: &[String]) -> Result<Self, SanitizerError> {
        for (i, pattern) in patterns.iter().enumerate() {
            let regex = Regex::new(pattern).map_err(|e| SanitizerError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            self.rules.push(PatternRule {
                name: format!("custom_{i}"),
                regex,
                mode: RuleMode::Whole,
            });
        }
        Ok(self)
    }

    /// Build the sanitizer described by the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Result<Self, SanitizerError> {
        Self::new(config.redaction_marker.clone()).with_patterns(&config.extra_secret_patterns)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Register a secret literal. Short or blank values are ignored.
    pub fn register(&self, value: &str) {
        let value = value.trim();
        if value.chars().count() < MIN_LITERAL_LEN || value == self.marker {
            return;
        }
        let mut literals = self.literals.write().unwrap_or_else(|e| e.into_inner());
        if literals.iter().any(|l| l == value) {
            return;
        }
        literals.push(value.to_string());
        literals.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    }

    pub fn registered_count(&self) -> usize {
        self.literals.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    // -----------------------------------------------------------------------
    // Text
    // -----------------------------------------------------------------------

    /// Replace every registered literal and pattern match with the marker.
    pub fn sanitize(&self, text: &str) -> String {
        let mut out = text.to_string();
        {
            let literals = self.literals.read().unwrap_or_else(|e| e.into_inner());
            for literal in literals.iter() {
                if out.contains(literal.as_str()) {
                    out = out.replace(literal.as_str(), &self.marker);
                }
            }
        }

        for rule in &self.rules {
            out = match rule.mode {
                RuleMode::Whole => rule.regex.replace_all(&out, self.marker.as_str()).into_owned(),
                RuleMode::Value => rule
                    .regex
                    .replace_all(&out, |caps: &Captures<'_>| {
                        if self.is_marker_value(&caps[3]) {
                            caps[0].to_string()
                        } else {
                            format!("{}{}{}", &caps[1], &caps[2], self.marker)
                        }
                    })
                    .into_owned(),
            };
        }
        out
    }

    /// Whether the text holds a registered literal or matches a rule.
    pub fn contains_secret(&self, text: &str) -> bool {
        self.matching_literal(text) || self.matching_rule(text).is_some()
    }

    fn matching_literal(&self, text: &str) -> bool {
        let literals = self.literals.read().unwrap_or_else(|e| e.into_inner());
        literals.iter().any(|l| text.contains(l.as_str()))
    }

    fn matching_rule(&self, text: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| match rule.mode {
                RuleMode::Whole => rule.regex.is_match(text),
                RuleMode::Value => rule
                    .regex
                    .captures_iter(text)
                    .any(|caps| !self.is_marker_value(&caps[3])),
            })
            .map(|rule| rule.name.as_str())
    }

    fn is_marker_value(&self, value: &str) -> bool {
        value.trim_matches(|c| c == '"' || c == '\'') == self.marker
    }

    // -----------------------------------------------------------------------
    // Structured values
    // -----------------------------------------------------------------------

    /// Recursively sanitize a JSON value. String values under suspicious keys
    /// are replaced outright.
    pub fn sanitize_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.sanitize_value(v)).collect())
            }
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, v) in map {
                    let clean = match v {
                        Value::String(s) if is_suspicious_key(key) && !s.is_empty() => {
                            Value::String(self.marker.clone())
                        }
                        other => self.sanitize_value(other),
                    };
                    out.insert(key.clone(), clean);
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// Flag literal leaks, pattern matches, and suspicious key names.
    ///
    /// An empty result means the artifact is clean.
    pub fn validate_no_secrets(&self, artifact: &Value) -> Vec<SecretFinding> {
        let mut findings = Vec::new();
        self.scan(artifact, "$", &mut findings);
        findings
    }

    fn scan(&self, value: &Value, path: &str, findings: &mut Vec<SecretFinding>) {
        match value {
            Value::String(s) => {
                if self.matching_literal(s) {
                    findings.push(SecretFinding::Literal {
                        path: path.to_string(),
                    });
                } else if let Some(rule) = self.matching_rule(s) {
                    findings.push(SecretFinding::Pattern {
                        path: path.to_string(),
                        rule: rule.to_string(),
                    });
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.scan(item, &format!("{path}[{i}]"), findings);
                }
            }
            Value::Object(map) => {
                for (key, v) in map {
                    let child = format!("{path}.{key}");
                    if is_suspicious_key(key) {
                        findings.push(SecretFinding::SuspiciousKey {
                            path: child.clone(),
                            key: key.clone(),
                        });
                    }
                    self.scan(v, &child, findings);
                }
            }
            _ => {}
        }
    }

    /// Convenience: validate a plain text artifact.
    pub fn validate_text(&self, text: &str) -> Vec<SecretFinding> {
        self.validate_no_secrets(&Value::String(text.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
