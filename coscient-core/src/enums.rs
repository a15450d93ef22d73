//! Closed enumerations shared across the runtime

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// AGENT TYPE
// ============================================================================

/// The specialized agent a request originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    Generation,
    Reflection,
    Ranking,
    Evolution,
    Proximity,
    MetaReview,
}

impl AgentType {
    /// All agent types, in dispatch order.
    pub const ALL: [AgentType; 6] = [
        AgentType::Generation,
        AgentType::Reflection,
        AgentType::Ranking,
        AgentType::Evolution,
        AgentType::Proximity,
        AgentType::MetaReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Generation => "generation",
            AgentType::Reflection => "reflection",
            AgentType::Ranking => "ranking",
            AgentType::Evolution => "evolution",
            AgentType::Proximity => "proximity",
            AgentType::MetaReview => "meta-review",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generation" => Ok(AgentType::Generation),
            "reflection" => Ok(AgentType::Reflection),
            "ranking" => Ok(AgentType::Ranking),
            "evolution" => Ok(AgentType::Evolution),
            "proximity" => Ok(AgentType::Proximity),
            // The env/config surface uses the underscore spelling.
            "meta-review" | "meta_review" => Ok(AgentType::MetaReview),
            _ => Err(EnumParseError {
                kind: "agent_type",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// REQUEST TYPE
// ============================================================================

/// The gateway operation a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Generate,
    Analyze,
    Evaluate,
    Compare,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Generate => "generate",
            RequestType::Analyze => "analyze",
            RequestType::Evaluate => "evaluate",
            RequestType::Compare => "compare",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate" => Ok(RequestType::Generate),
            "analyze" => Ok(RequestType::Analyze),
            "evaluate" => Ok(RequestType::Evaluate),
            "compare" => Ok(RequestType::Compare),
            _ => Err(EnumParseError {
                kind: "request_type",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// RESPONSE STATUS
// ============================================================================

/// Terminal status of a gateway response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Partial,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Success => "success",
            ResponseStatus::Error => "error",
            ResponseStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// STATE UPDATE TYPE
// ============================================================================

/// Classification of a persisted state update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Periodic,
    Checkpoint,
    Critical,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Periodic => "periodic",
            UpdateType::Checkpoint => "checkpoint",
            UpdateType::Critical => "critical",
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TASK TYPE (model routing)
// ============================================================================

/// Workload classification used for model routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Generation,
    Reasoning,
    SimpleQuery,
    Analysis,
    Summarization,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Generation => "generation",
            TaskType::Reasoning => "reasoning",
            TaskType::SimpleQuery => "simple_query",
            TaskType::Analysis => "analysis",
            TaskType::Summarization => "summarization",
        }
    }

    /// Canonical task for an agent when no routing rule overrides it.
    pub fn for_agent(agent: AgentType) -> TaskType {
        match agent {
            AgentType::Generation => TaskType::Generation,
            AgentType::Reflection => TaskType::Analysis,
            AgentType::Ranking => TaskType::SimpleQuery,
            AgentType::Evolution => TaskType::Generation,
            AgentType::Proximity => TaskType::SimpleQuery,
            AgentType::MetaReview => TaskType::Analysis,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PARSE ERROR
// ============================================================================

/// Error when parsing a string into one of the closed enums above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for EnumParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_type_round_trips_through_str() {
        for agent in AgentType::ALL {
            assert_eq!(agent.as_str().parse::<AgentType>().unwrap(), agent);
        }
    }

    #[test]
    fn meta_review_accepts_both_spellings() {
        assert_eq!("meta-review".parse::<AgentType>().unwrap(), AgentType::MetaReview);
        assert_eq!("meta_review".parse::<AgentType>().unwrap(), AgentType::MetaReview);
    }

    #[test]
    fn unknown_agent_type_is_rejected() {
        let err = "supervisor-x".parse::<AgentType>().unwrap_err();
        assert_eq!(err.kind, "agent_type");
    }

    #[test]
    fn serde_uses_wire_spellings() {
        let json = serde_json::to_string(&AgentType::MetaReview).unwrap();
        assert_eq!(json, "\"meta-review\"");
        let json = serde_json::to_string(&RequestType::Evaluate).unwrap();
        assert_eq!(json, "\"evaluate\"");
    }
}
