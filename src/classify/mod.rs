//! Subject-line classification: urgency flag and SKU token.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{AppError, AppResult};

pub const DEFAULT_URGENCY_TERMS: &[&str] = &[
    "Immediate",
    "Critical",
    "Important",
    "Pressing",
    "Emergency",
    "Hasty",
    "Swift",
    "Quick",
    "Instant",
    "Rapid",
    "Fast",
    "Alarming",
    "Dire",
    "Priority",
    "Vital",
    "Exigent",
    "Necessary",
    "Expedite",
    "Crucial",
    "Rush",
    "Time-sensitive",
    "Prompt",
    "On-demand",
    "Essential",
    "Imperative",
    "High-priority",
    "Flash",
    "Accelerate",
    "Severe",
    "Pinnacle",
    "Burning",
    "Urgency",
    "Urgent",
    "Unavoidable",
    "Must-do",
    "Grave",
    "Immediate-action",
    "Top-priority",
    "Demanding",
    "Overdue",
    "Peak",
    "Now",
    "Deadline-driven",
    "Accelerated",
    "Mandatory",
    "Pivotal",
    "Clamoring",
    "Necessary-action",
    "Alarmed",
    "Speedy",
    "Deadline-critical",
    "ASAP",
    "Action Needed",
    "Alert",
    "Security",
];

const LOOSE_SKU: &str = r"\b(?:SKU-?\d+|[A-Z0-9-]{5,})\b";
const PREFIXED_SKU: &str = r"\bSKU-?\d+\b";
const STRUCTURED_SKU: &str = r"\b[A-Z]{2}-[A-Z]{2}-[A-Z]{3}-\d{6}\b";

/// Which regex extracts the SKU token from a subject.
///
/// `Loose` also accepts any run of five or more uppercase letters, digits or
/// hyphens, so an all-caps word such as `URGENT` counts as a SKU. Use
/// `Prefixed` or `Structured` when subjects carry shouted words.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SkuPattern {
    #[default]
    Loose,
    Prefixed,
    Structured,
    Custom(String),
}

impl SkuPattern {
    /// `loose`, `prefixed` and `structured` select the built-in patterns;
    /// anything else is taken as a regex.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "loose" => SkuPattern::Loose,
            "prefixed" => SkuPattern::Prefixed,
            "structured" => SkuPattern::Structured,
            _ => SkuPattern::Custom(raw.trim().to_string()),
        }
    }

    pub fn as_regex(&self) -> &str {
        match self {
            SkuPattern::Loose => LOOSE_SKU,
            SkuPattern::Prefixed => PREFIXED_SKU,
            SkuPattern::Structured => STRUCTURED_SKU,
            SkuPattern::Custom(pattern) => pattern,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    pub urgent: bool,
    pub sku: Option<String>,
}

/// Immutable after construction; share it behind an `Arc`.
#[derive(Clone, Debug)]
pub struct Classifier {
    vocabulary: Vec<String>,
    sku: Regex,
}

impl Classifier {
    pub fn new<I, S>(terms: I, pattern: &SkuPattern) -> AppResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let vocabulary = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        let sku = Regex::new(pattern.as_regex())
            .map_err(|e| AppError::Config(format!("invalid SKU pattern {:?}: {e}", pattern.as_regex())))?;

        Ok(Self { vocabulary, sku })
    }

    pub fn classify(&self, subject: &str) -> Classification {
        let lowered = subject.to_lowercase();
        let urgent = self.vocabulary.iter().any(|term| lowered.contains(term));
        let sku = self.sku.find(subject).map(|m| m.as_str().to_string());

        Classification { urgent, sku }
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }
}

impl Default for Classifier {
    fn default() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }
}

static DEFAULT_CLASSIFIER: Lazy<Classifier> = Lazy::new(|| Classifier {
    vocabulary: DEFAULT_URGENCY_TERMS
        .iter()
        .map(|t| t.to_lowercase())
        .collect(),
    sku: Regex::new(LOOSE_SKU).expect("built-in SKU pattern compiles"),
});

/// Classifies with the built-in vocabulary and the loose SKU pattern.
pub fn classify(subject: &str) -> Classification {
    DEFAULT_CLASSIFIER.classify(subject)
}
