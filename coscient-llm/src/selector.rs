//! Model selection, routing rules and usage tracking

use coscient_core::{AgentType, GatewayError, TaskType, UsageRecord};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Handles model selection logic and usage tracking.
///
/// Costs are dollars per 1M tokens (input, output); tracked usage converts
/// them to per-request dollar amounts rounded to 6 decimals.
pub struct ModelSelector {
    model_costs: HashMap<String, (f64, f64)>,
    model_tags: HashMap<String, Vec<&'static str>>,
    task_preferences: HashMap<TaskType, Vec<String>>,
    routing_rules: Mutex<HashMap<AgentType, String>>,
    available_models: Mutex<HashSet<String>>,
    usage_stats: Mutex<HashMap<String, UsageRecord>>,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelSelector {
    pub fn new() -> Self {
        let model_costs: HashMap<String, (f64, f64)> = [
            ("gpto3", (15.0, 60.0)),
            ("gpt4o", (5.0, 15.0)),
            ("gpt35", (0.5, 1.5)),
            ("claudeopus4", (15.0, 75.0)),
            ("claudesonnet4", (3.0, 15.0)),
            ("gemini25pro", (3.5, 10.5)),
            ("gemini25flash", (0.075, 0.3)),
        ]
        .into_iter()
        .map(|(name, costs)| (name.to_string(), costs))
        .collect();

        let model_tags: HashMap<String, Vec<&'static str>> = [
            ("gpto3", vec!["deep_reasoning", "complex_analysis", "step_by_step", "verification"]),
            ("gpt4o", vec!["reasoning", "generation", "analysis", "coding"]),
            ("gpt35", vec!["simple_query", "summarization", "basic_analysis"]),
            ("claudeopus4", vec!["reasoning", "generation", "creative", "long_context"]),
            ("claudesonnet4", vec!["analysis", "summarization", "moderate_reasoning"]),
            ("gemini25pro", vec!["reasoning", "analysis", "multimodal"]),
            ("gemini25flash", vec!["simple_query", "fast_response", "basic_analysis"]),
        ]
        .into_iter()
        .map(|(name, tags)| (name.to_string(), tags))
        .collect();

        let to_models = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let task_preferences = HashMap::from([
            (TaskType::Generation, to_models(&["claudeopus4", "gpt4o"])),
            (TaskType::Reasoning, to_models(&["gpto3", "gpt4o", "claudeopus4", "gemini25pro"])),
            (TaskType::SimpleQuery, to_models(&["gpt35", "gemini25flash"])),
            (TaskType::Analysis, to_models(&["gpt4o", "gemini25pro", "claudesonnet4"])),
            (TaskType::Summarization, to_models(&["claudesonnet4", "gpt35"])),
        ]);

        let available_models = model_costs.keys().cloned().collect();

        Self {
            model_costs,
            model_tags,
            task_preferences,
            routing_rules: Mutex::new(HashMap::new()),
            available_models: Mutex::new(available_models),
            usage_stats: Mutex::new(HashMap::new()),
        }
    }

    /// Known models, regardless of current availability.
    pub fn known_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.model_costs.keys().cloned().collect();
        models.sort();
        models
    }

    pub fn capability_tags(&self, model: &str) -> Option<&[&'static str]> {
        self.model_tags.get(model).map(Vec::as_slice)
    }

    /// Select the best model for a given task type.
    ///
    /// Preferences are filtered by availability; with `budget_conscious`
    /// the candidates are sorted cheapest-input-first.
    pub fn select_model_for_task(
        &self,
        task_type: TaskType,
        budget_conscious: bool,
    ) -> Result<String, GatewayError> {
        let available = lock(&self.available_models);

        let preferred = self.task_preferences.get(&task_type);
        let mut candidates: Vec<String> = preferred
            .map(|models| {
                models
                    .iter()
                    .filter(|m| available.contains(*m))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if candidates.is_empty() {
            // Fall back to any available model.
            candidates = available.iter().cloned().collect();
            candidates.sort();
        }

        if candidates.is_empty() {
            return Err(GatewayError::NoModelsAvailable {
                task: task_type.to_string(),
            });
        }

        if budget_conscious {
            candidates.sort_by(|a, b| {
                let cost_a = self.model_costs.get(a).map(|c| c.0).unwrap_or(f64::MAX);
                let cost_b = self.model_costs.get(b).map(|c| c.0).unwrap_or(f64::MAX);
                cost_a.partial_cmp(&cost_b).unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        Ok(candidates.remove(0))
    }

    /// Select a model based on agent-specific routing rules, falling back
    /// to the agent's canonical task.
    pub fn select_model_for_agent(&self, agent_type: AgentType) -> Result<String, GatewayError> {
        {
            let rules = lock(&self.routing_rules);
            if let Some(model) = rules.get(&agent_type) {
                if lock(&self.available_models).contains(model) {
                    return Ok(model.clone());
                }
            }
        }

        self.select_model_for_task(TaskType::for_agent(agent_type), false)
    }

    /// Select an available model for a task, skipping models whose circuit
    /// breaker is currently open.
    pub fn select_with_failover(
        &self,
        task_type: TaskType,
        preferred_model: Option<&str>,
        open_models: &HashSet<String>,
    ) -> Result<String, GatewayError> {
        let available = lock(&self.available_models);

        if let Some(preferred) = preferred_model {
            if available.contains(preferred) && !open_models.contains(preferred) {
                return Ok(preferred.to_string());
            }
        }

        let candidates = self
            .task_preferences
            .get(&task_type)
            .cloned()
            .unwrap_or_else(|| self.known_models());

        candidates
            .into_iter()
            .find(|model| available.contains(model) && !open_models.contains(model))
            .ok_or_else(|| GatewayError::NoModelsAvailable {
                task: task_type.to_string(),
            })
    }

    /// Estimated dollar cost for a request (prices are per 1M tokens).
    pub fn estimated_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let Some((input_cost, output_cost)) = self.model_costs.get(model) else {
            return 0.0;
        };
        let total = (input_tokens as f64 * input_cost + output_tokens as f64 * output_cost)
            / 1_000_000.0;
        (total * 1e6).round() / 1e6
    }

    /// Record usage for a completed request.
    pub fn track_usage(&self, model: &str, input_tokens: u64, output_tokens: u64) {
        let cost = self.estimated_cost(model, input_tokens, output_tokens);
        let mut stats = lock(&self.usage_stats);
        let record = stats.entry(model.to_string()).or_default();
        record.total_input_tokens += input_tokens;
        record.total_output_tokens += output_tokens;
        record.request_count += 1;
        record.total_cost += cost;
    }

    pub fn usage_report(&self) -> HashMap<String, UsageRecord> {
        lock(&self.usage_stats).clone()
    }

    pub fn set_routing_rules(&self, rules: HashMap<AgentType, String>) {
        *lock(&self.routing_rules) = rules;
    }

    pub fn mark_model_unavailable(&self, model: &str) {
        lock(&self.available_models).remove(model);
    }

    pub fn mark_model_available(&self, model: &str) {
        if self.model_costs.contains_key(model) {
            lock(&self.available_models).insert(model.to_string());
        }
    }

    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<String> = lock(&self.available_models).iter().cloned().collect();
        models.sort();
        models
    }

    pub fn is_available(&self, model: &str) -> bool {
        lock(&self.available_models).contains(model)
    }
}

impl std::fmt::Debug for ModelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSelector")
            .field("known_models", &self.model_costs.len())
            .finish()
    }
}
