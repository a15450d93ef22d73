//! Canonical domain artifact types
//!
//! These are the structured results agents decode from model replies and
//! persist into the active iteration. Fields default liberally so partial
//! model output still decodes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A research goal submitted to the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchGoal {
    pub description: String,
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl ResearchGoal {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            constraints: Vec::new(),
        }
    }
}

/// Literature citation attached to a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
}

/// Experimental protocol proposed for validating a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentalProtocol {
    pub objective: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

/// A generated research hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub experimental_protocol: Option<ExperimentalProtocol>,
    #[serde(default)]
    pub generation_method: Option<String>,
}

fn default_confidence() -> f64 {
    0.5
}

/// Perspective a review is conducted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewType {
    Initial,
    Full,
    DeepVerification,
    Observation,
    Simulation,
    Tournament,
}

/// Structured review of a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub hypothesis_id: String,
    pub review_type: ReviewType,
    #[serde(default)]
    pub scores: Map<String, Value>,
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub decision: Option<String>,
}

/// Result of comparing two hypotheses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub winner: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub scores: Map<String, Value>,
}

/// Similarity between two hypotheses, in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub hypothesis_a: String,
    pub hypothesis_b: String,
    pub score: f64,
    #[serde(default)]
    pub shared_concepts: Vec<String>,
}

/// Patterns extracted across reviews for the meta-review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchPatterns {
    #[serde(default)]
    pub common_patterns: Vec<String>,
    #[serde(default)]
    pub agent_feedback: Map<String, Value>,
    #[serde(default)]
    pub improvement_areas: Vec<String>,
}

/// Safety assessment of a goal or hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub safe: bool,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
}

/// Structured decomposition of a natural-language research goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResearchGoal {
    pub primary_objective: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}
