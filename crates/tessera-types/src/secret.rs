use serde::{Deserialize, Serialize};

use std::fmt;

/// A wrapper that redacts secret values in Debug and Display output.
///
/// Use this to wrap any `String` that might contain sensitive data.
/// The actual value is accessible via `.expose()`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redacted(String);

impl Redacted {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the underlying secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Show masked representation: last 4 chars visible.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 4 {
            "****".to_string()
        } else {
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("****{tail}")
        }
    }
}

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Redacted(\"***\")")
    }
}

impl fmt::Display for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

/// Why a piece of content was flagged by secret validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecretFinding {
    /// A registered secret literal appears verbatim.
    Literal { path: String },
    /// A value matches a secret-shaped pattern rule.
    Pattern { path: String, rule: String },
    /// A key name suggests a credential regardless of its value.
    SuspiciousKey { path: String, key: String },
}

impl SecretFinding {
    /// JSON-pointer-like location of the finding.
    pub fn path(&self) -> &str {
        match self {
            SecretFinding::Literal { path }
            | SecretFinding::Pattern { path, .. }
            | SecretFinding::SuspiciousKey { path, .. } => path,
        }
    }

    /// Whether the finding is about leaked content rather than a key name.
    pub fn is_value_leak(&self) -> bool {
        !matches!(self, SecretFinding::SuspiciousKey { .. })
    }
}

impl fmt::Display for SecretFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretFinding::Literal { path } => write!(f, "registered secret literal at {path}"),
            SecretFinding::Pattern { path, rule } => write!(f, "{rule} pattern at {path}"),
            SecretFinding::SuspiciousKey { path, key } => {
                write!(f, "suspicious key '{key}' at {path}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_debug_hides_value() {
        let secret = Redacted::new("sk-abc123xyz");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("abc123xyz"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_redacted_display_hides_value() {
        let secret = Redacted::new("sk-abc123xyz");
        assert!(!secret.to_string().contains("abc123xyz"));
    }

    #[test]
    fn test_redacted_masked() {
        assert_eq!(Redacted::new("sk-abc123xyz").masked(), "****3xyz");
        assert_eq!(Redacted::new("ab").masked(), "****");
    }

    #[test]
    fn test_finding_value_leak() {
        let key = SecretFinding::SuspiciousKey {
            path: "$.password".to_string(),
            key: "password".to_string(),
        };
        let lit = SecretFinding::Literal {
            path: "$".to_string(),
        };
        assert!(!key.is_value_leak());
        assert!(lit.is_value_leak());
        assert_eq!(key.path(), "$.password");
    }
}
