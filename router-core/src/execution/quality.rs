//! Result quality check for premium output
//!
//! Two heuristics: completeness (non-empty, long enough, not cut off) and
//! technical quality (no placeholder code, no refusal). A failed check makes
//! the execution manager retry once on the standard tier.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::config::QualityConfig;

/// Output ending in an ellipsis or an explicit truncation marker.
static TRUNCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\.\.\.|…|\[truncated\]|<truncated>|\(continued\))\s*$")
        .expect("TRUNCATION_RE regex should compile")
});

/// Stub markers left in place of real work.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(TODO|FIXME|XXX)\b|\btodo!\(\)|\bunimplemented!\(\)|<placeholder>|\.\.\.\s*rest of (the )?(code|implementation)",
    )
    .expect("PLACEHOLDER_RE regex should compile")
});

/// Model declining the task.
static REFUSAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(I can(?:not|'t|’t) (?:help|assist|do that)|I(?: am|'m|’m) unable to|as an AI(?: language)? model)")
        .expect("REFUSAL_RE regex should compile")
});

/// Penalty per placeholder hit, capped at four hits
const PLACEHOLDER_PENALTY: f64 = 0.25;

/// Something wrong with a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum QualityIssue {
    Empty,
    TooShort { chars: usize, min: usize },
    Truncated,
    Placeholder { marker: String },
    Refusal,
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty output"),
            Self::TooShort { chars, min } => write!(f, "output too short ({chars} < {min} chars)"),
            Self::Truncated => write!(f, "output truncated"),
            Self::Placeholder { marker } => write!(f, "placeholder `{marker}`"),
            Self::Refusal => write!(f, "refusal"),
        }
    }
}

/// Outcome of a quality check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub passed: bool,
    /// Mean of completeness and technical quality
    pub score: f64,
    pub completeness: f64,
    pub technical: f64,
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    /// Issues joined for logs and the downgrade payload
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityChecker {
    config: QualityConfig,
}

impl QualityChecker {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, output: &str) -> QualityReport {
        let mut issues = Vec::new();

        let chars = output.chars().filter(|c| !c.is_whitespace()).count();
        let mut completeness: f64 = 1.0;
        if chars == 0 {
            issues.push(QualityIssue::Empty);
            completeness = 0.0;
        } else {
            if chars < self.config.min_chars {
                issues.push(QualityIssue::TooShort {
                    chars,
                    min: self.config.min_chars,
                });
                completeness -= 0.5;
            }
            if TRUNCATION_RE.is_match(output) {
                issues.push(QualityIssue::Truncated);
                completeness -= 0.5;
            }
        }

        let mut technical: f64 = 1.0;
        let refused = REFUSAL_RE.is_match(output);
        if refused {
            issues.push(QualityIssue::Refusal);
            technical = 0.0;
        }
        let placeholders: Vec<String> = PLACEHOLDER_RE
            .find_iter(output)
            .take(4)
            .map(|m| m.as_str().to_string())
            .collect();
        technical -= PLACEHOLDER_PENALTY * placeholders.len() as f64;
        issues.extend(
            placeholders
                .into_iter()
                .map(|marker| QualityIssue::Placeholder { marker }),
        );

        let completeness = completeness.clamp(0.0, 1.0);
        let technical = technical.clamp(0.0, 1.0);
        let score = (completeness + technical) / 2.0;
        let passed = chars > 0 && !refused && score >= self.config.min_score;

        QualityReport {
            passed,
            score,
            completeness,
            technical,
            issues,
        }
    }
}
