//! Typed task client over the gateway
//!
//! Each operation builds a typed request for the matching gateway call and
//! decodes the reply content into the canonical domain type. Gateway error
//! responses surface as agent errors; malformed content is a decode error,
//! never a panic.

use crate::artifacts::{
    ComparisonResult, Hypothesis, ParsedResearchGoal, ResearchPatterns, Review, ReviewType,
    SafetyCheck, SimilarityScore,
};
use coscient_core::{
    AgentError, AgentType, CoscientResult, LlmRequest, LlmResponse, RequestContent, RequestType,
};
use coscient_llm::Provider;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Typed wrapper agents use to talk to the gateway.
pub struct TaskClient {
    provider: Arc<dyn Provider>,
}

impl TaskClient {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    fn request(
        agent_type: AgentType,
        request_type: RequestType,
        prompt: String,
        context: Map<String, Value>,
    ) -> LlmRequest {
        let content = RequestContent {
            prompt,
            context,
            parameters: {
                let mut p = Map::new();
                p.insert("response_format".to_string(), json!("structured"));
                p
            },
        };
        LlmRequest::new(
            format!("req_{}", Uuid::new_v4().simple()),
            agent_type,
            request_type,
            content,
        )
    }

    /// Decode a gateway reply into a domain artifact.
    fn decode<T: DeserializeOwned>(response: LlmResponse, artifact: &str) -> CoscientResult<T> {
        if let Some(error) = &response.error {
            return Err(AgentError::Llm {
                code: error.code.clone(),
                message: error.message.clone(),
            }
            .into());
        }
        let content = response.content().unwrap_or_default();

        // Models sometimes wrap structured output in a code fence.
        let trimmed = content.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|s| s.strip_suffix("```"))
            .unwrap_or(trimmed)
            .trim();

        serde_json::from_str(body).map_err(|e| {
            AgentError::DecodeFailed {
                artifact: artifact.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Generate a new hypothesis.
    pub async fn generate_hypothesis(
        &self,
        goal: &str,
        constraints: &[String],
        existing_hypotheses: &[Hypothesis],
        focus_area: Option<&str>,
        generation_method: &str,
    ) -> CoscientResult<Hypothesis> {
        let mut context = Map::new();
        context.insert("goal".to_string(), json!(goal));
        context.insert("constraints".to_string(), json!(constraints));
        context.insert(
            "existing_hypotheses".to_string(),
            json!(existing_hypotheses.iter().map(|h| &h.summary).collect::<Vec<_>>()),
        );
        context.insert("generation_method".to_string(), json!(generation_method));
        if let Some(focus) = focus_area {
            context.insert("focus_area".to_string(), json!(focus));
        }

        let request = Self::request(
            AgentType::Generation,
            RequestType::Generate,
            format!("Generate a novel research hypothesis for the goal: {goal}"),
            context,
        );
        debug!(request_id = request.request_id, "generate_hypothesis");
        let response = self.provider.generate(request).await;
        Self::decode(response, "Hypothesis")
    }

    /// Evaluate a hypothesis from the given review perspective.
    pub async fn evaluate_hypothesis(
        &self,
        hypothesis: &Hypothesis,
        review_type: ReviewType,
        evaluation_criteria: &[String],
    ) -> CoscientResult<Review> {
        let mut context = Map::new();
        context.insert("hypothesis".to_string(), json!(hypothesis));
        context.insert("review_type".to_string(), json!(review_type));
        context.insert("evaluation_criteria".to_string(), json!(evaluation_criteria));

        let request = Self::request(
            AgentType::Reflection,
            RequestType::Evaluate,
            format!("Evaluate the hypothesis: {}", hypothesis.summary),
            context,
        );
        let response = self.provider.evaluate(request).await;
        Self::decode(response, "Review")
    }

    /// Run a safety assessment over arbitrary research content.
    pub async fn perform_safety_check(
        &self,
        content: &str,
        context_data: Map<String, Value>,
    ) -> CoscientResult<SafetyCheck> {
        let mut context = context_data;
        context.insert("content".to_string(), json!(content));

        let request = Self::request(
            AgentType::Reflection,
            RequestType::Evaluate,
            format!("Assess the research safety of: {content}"),
            context,
        );
        let response = self.provider.evaluate(request).await;
        Self::decode(response, "SafetyCheck")
    }

    /// Compare two hypotheses head to head.
    pub async fn compare_hypotheses(
        &self,
        first: &Hypothesis,
        second: &Hypothesis,
        criteria: &[String],
    ) -> CoscientResult<ComparisonResult> {
        let mut context = Map::new();
        context.insert("first".to_string(), json!(first));
        context.insert("second".to_string(), json!(second));
        context.insert("criteria".to_string(), json!(criteria));

        let request = Self::request(
            AgentType::Ranking,
            RequestType::Compare,
            format!("Compare hypotheses {} and {}", first.id, second.id),
            context,
        );
        let response = self.provider.compare(request).await;
        Self::decode(response, "ComparisonResult")
    }

    /// Produce an improved variant of a hypothesis.
    pub async fn enhance_hypothesis(
        &self,
        hypothesis: &Hypothesis,
        enhancement_focus: &str,
    ) -> CoscientResult<Hypothesis> {
        let mut context = Map::new();
        context.insert("hypothesis".to_string(), json!(hypothesis));
        context.insert("enhancement_focus".to_string(), json!(enhancement_focus));

        let request = Self::request(
            AgentType::Evolution,
            RequestType::Generate,
            format!("Enhance the hypothesis ({enhancement_focus}): {}", hypothesis.summary),
            context,
        );
        let response = self.provider.generate(request).await;
        Self::decode(response, "Hypothesis")
    }

    /// Similarity between two hypotheses.
    pub async fn calculate_similarity(
        &self,
        first: &Hypothesis,
        second: &Hypothesis,
    ) -> CoscientResult<SimilarityScore> {
        let mut context = Map::new();
        context.insert("first".to_string(), json!(first));
        context.insert("second".to_string(), json!(second));

        let request = Self::request(
            AgentType::Proximity,
            RequestType::Analyze,
            format!("Score the similarity of hypotheses {} and {}", first.id, second.id),
            context,
        );
        let response = self.provider.analyze(request).await;
        Self::decode(response, "SimilarityScore")
    }

    /// Extract cross-review patterns for the meta-review.
    pub async fn extract_research_patterns(
        &self,
        reviews: &[Review],
    ) -> CoscientResult<ResearchPatterns> {
        let mut context = Map::new();
        context.insert("reviews".to_string(), json!(reviews));

        let request = Self::request(
            AgentType::MetaReview,
            RequestType::Analyze,
            format!("Extract recurring patterns from {} reviews", reviews.len()),
            context,
        );
        let response = self.provider.analyze(request).await;
        Self::decode(response, "ResearchPatterns")
    }

    /// Parse a natural-language research goal into its structured form.
    pub async fn parse_research_goal(&self, goal_text: &str) -> CoscientResult<ParsedResearchGoal> {
        let mut context = Map::new();
        context.insert("goal_text".to_string(), json!(goal_text));

        let request = Self::request(
            AgentType::Generation,
            RequestType::Analyze,
            format!("Parse the research goal: {goal_text}"),
            context,
        );
        let response = self.provider.analyze(request).await;
        Self::decode(response, "ParsedResearchGoal")
    }
}

impl std::fmt::Debug for TaskClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskClient").finish()
    }
}
