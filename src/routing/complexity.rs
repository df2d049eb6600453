//! Complexity classification for routing decisions.

use crate::types::RequestKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Routing classification driving backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

impl ComplexityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityTier::Low => "low",
            ComplexityTier::Medium => "medium",
            ComplexityTier::High => "high",
        }
    }
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthBucket {
    Short,
    Medium,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningLevel {
    None,
    /// Exactly one distinct reasoning marker.
    Some,
    /// Two or more distinct markers.
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestShape {
    Conversational,
    Structured,
}

/// Raw signals behind a classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexitySignals {
    pub length_chars: usize,
    pub length: LengthBucket,
    pub reasoning_markers: usize,
    pub reasoning: ReasoningLevel,
    pub shape: RequestShape,
    /// The length sat just above a bucket boundary and was counted in the lower bucket.
    pub rounded_down: bool,
}

/// Classification result. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityScore {
    pub tier: ComplexityTier,
    /// Agreement of the individual signals with the chosen tier, in `[0, 1]`.
    pub confidence: f32,
    pub signals: ComplexitySignals,
}

/// Length bucket boundaries, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityThresholds {
    /// Prompts shorter than this are `Short`.
    pub short_max_chars: usize,
    /// Prompts shorter than this (and not `Short`) are `Medium`.
    pub medium_max_chars: usize,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self {
            short_max_chars: 200,
            medium_max_chars: 800,
        }
    }
}

/// Lengths up to this fraction above a boundary are counted in the lower bucket.
const BOUNDARY_MARGIN: f64 = 0.10;
const ROUNDING_PENALTY: f32 = 0.15;

static REASONING_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bstep[- ]by[- ]step\b",
        r"\bexplain why\b",
        r"\bcompar(e|ing|ison)\b",
        r"\banaly[sz](e|is|ing)\b",
        r"\btrade[- ]?offs?\b",
        r"\bpros and cons\b",
        r"\bevaluate\b",
        r"\b(prove|derive|justify)\b",
        r"\b(design|architect(ure)?)\b",
        r"\boptimi[sz](e|ation)\b",
        r"\bdebug\b",
        r"\bfirst\b.*\bthen\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(&format!("(?is){p}")).ok())
    .collect()
});

static STRUCTURE_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"```",
        r"(?i)\b(json|yaml|sql|regex|script|bash|code|function|table|csv)\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Decision table: every `(length, reasoning, shape)` combination maps to one tier.
///
/// Where signals disagree the lower tier wins, so ambiguous requests take the
/// cheaper local path.
pub fn decide(length: LengthBucket, reasoning: ReasoningLevel, shape: RequestShape) -> ComplexityTier {
    use ComplexityTier::*;
    use LengthBucket as L;
    use ReasoningLevel as R;
    use RequestShape as S;

    match (length, reasoning, shape) {
        (L::Short, R::None, _) => Low,
        (L::Short, R::Some, S::Conversational) => Low,
        (L::Short, R::Some, S::Structured) => Medium,
        (L::Short, R::Multi, _) => Medium,

        (L::Medium, R::None, S::Conversational) => Low,
        (L::Medium, R::None, S::Structured) => Medium,
        (L::Medium, R::Some, _) => Medium,
        (L::Medium, R::Multi, S::Conversational) => Medium,
        (L::Medium, R::Multi, S::Structured) => High,

        (L::Long, R::None, _) => Medium,
        (L::Long, R::Some, S::Conversational) => Medium,
        (L::Long, R::Some, S::Structured) => High,
        (L::Long, R::Multi, _) => High,
    }
}

/// Deterministic, network-free request classifier.
#[derive(Debug, Clone, Default)]
pub struct ComplexityAnalyzer {
    thresholds: ComplexityThresholds,
}

impl ComplexityAnalyzer {
    pub fn new(thresholds: ComplexityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> ComplexityThresholds {
        self.thresholds
    }

    pub fn classify(&self, prompt: &str, kind: RequestKind) -> ComplexityScore {
        let length_chars = prompt.trim().chars().count();
        let (length, rounded_down) = self.bucket(length_chars);

        let reasoning_markers = REASONING_MARKERS
            .iter()
            .filter(|re| re.is_match(prompt))
            .count();
        let reasoning = match reasoning_markers {
            0 => ReasoningLevel::None,
            1 => ReasoningLevel::Some,
            _ => ReasoningLevel::Multi,
        };

        let shape = if kind.is_structured_task()
            || STRUCTURE_MARKERS.iter().any(|re| re.is_match(prompt))
        {
            RequestShape::Structured
        } else {
            RequestShape::Conversational
        };

        let tier = decide(length, reasoning, shape);
        let confidence = confidence(tier, length, reasoning, shape, rounded_down);

        debug!(
            tier = %tier,
            confidence,
            length_chars,
            reasoning_markers,
            structured = matches!(shape, RequestShape::Structured),
            rounded_down,
            "classified request complexity"
        );

        ComplexityScore {
            tier,
            confidence,
            signals: ComplexitySignals {
                length_chars,
                length,
                reasoning_markers,
                reasoning,
                shape,
                rounded_down,
            },
        }
    }

    fn bucket(&self, chars: usize) -> (LengthBucket, bool) {
        let t = &self.thresholds;
        let within_margin = |boundary: usize| {
            chars >= boundary && (chars as f64) < boundary as f64 * (1.0 + BOUNDARY_MARGIN)
        };
        if chars < t.short_max_chars {
            (LengthBucket::Short, false)
        } else if within_margin(t.short_max_chars) {
            (LengthBucket::Short, true)
        } else if chars < t.medium_max_chars {
            (LengthBucket::Medium, false)
        } else if within_margin(t.medium_max_chars) {
            (LengthBucket::Medium, true)
        } else {
            (LengthBucket::Long, false)
        }
    }
}

fn confidence(
    tier: ComplexityTier,
    length: LengthBucket,
    reasoning: ReasoningLevel,
    shape: RequestShape,
    rounded_down: bool,
) -> f32 {
    let votes = [
        match length {
            LengthBucket::Short => ComplexityTier::Low,
            LengthBucket::Medium => ComplexityTier::Medium,
            LengthBucket::Long => ComplexityTier::High,
        },
        match reasoning {
            ReasoningLevel::None => ComplexityTier::Low,
            ReasoningLevel::Some => ComplexityTier::Medium,
            ReasoningLevel::Multi => ComplexityTier::High,
        },
        match shape {
            RequestShape::Conversational => ComplexityTier::Low,
            RequestShape::Structured => ComplexityTier::Medium,
        },
    ];
    let agreeing = votes.iter().filter(|v| **v == tier).count() as f32;
    let mut c = agreeing / votes.len() as f32;
    if rounded_down {
        c -= ROUNDING_PENALTY;
    }
    c.clamp(0.0, 1.0)
}
