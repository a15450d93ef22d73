//! Model capability tracking and routing support

use crate::{ConfigError, GatewayError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// CAPABILITIES
// ============================================================================

/// Requirements a request places on a model.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CapabilityRequirements {
    pub context_size: u64,
    pub output_size: Option<u64>,
    pub requires_multimodal: bool,
    pub requires_streaming: bool,
    pub requires_function_calling: bool,
}

/// Static capabilities of an LLM model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub max_context: u64,
    pub max_output_tokens: u64,
    #[serde(default)]
    pub multimodal: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub function_calling: bool,
    #[serde(default)]
    pub supports_json_mode: bool,
    #[serde(default = "default_true")]
    pub supports_temperature: bool,
    #[serde(default)]
    pub cost_per_1k_input_tokens: f64,
    #[serde(default)]
    pub cost_per_1k_output_tokens: f64,
}

fn default_true() -> bool {
    true
}

impl ModelCapabilities {
    /// Construct with invariant checks: context/output limits positive,
    /// costs non-negative.
    pub fn new(max_context: u64, max_output_tokens: u64) -> Result<Self, ConfigError> {
        if max_context == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_context".to_string(),
                value: max_context.to_string(),
                reason: "max_context must be positive".to_string(),
            });
        }
        if max_output_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_output_tokens".to_string(),
                value: max_output_tokens.to_string(),
                reason: "max_output_tokens must be positive".to_string(),
            });
        }
        Ok(Self {
            max_context,
            max_output_tokens,
            multimodal: false,
            streaming: false,
            function_calling: false,
            supports_json_mode: false,
            supports_temperature: true,
            cost_per_1k_input_tokens: 0.0,
            cost_per_1k_output_tokens: 0.0,
        })
    }

    pub fn with_flags(mut self, multimodal: bool, streaming: bool, function_calling: bool) -> Self {
        self.multimodal = multimodal;
        self.streaming = streaming;
        self.function_calling = function_calling;
        self
    }

    pub fn with_json_mode(mut self, supported: bool) -> Self {
        self.supports_json_mode = supported;
        self
    }

    pub fn with_costs(mut self, per_1k_input: f64, per_1k_output: f64) -> Self {
        self.cost_per_1k_input_tokens = per_1k_input;
        self.cost_per_1k_output_tokens = per_1k_output;
        self
    }

    /// Whether this model can satisfy the given requirements.
    pub fn supports_request(&self, req: &CapabilityRequirements) -> bool {
        if req.context_size > self.max_context {
            return false;
        }
        if let Some(output) = req.output_size {
            if output > self.max_output_tokens {
                return false;
            }
        }
        if req.requires_multimodal && !self.multimodal {
            return false;
        }
        if req.requires_streaming && !self.streaming {
            return false;
        }
        if req.requires_function_calling && !self.function_calling {
            return false;
        }
        true
    }

    /// Estimated dollar cost for a call with the given token counts.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1000.0) * self.cost_per_1k_input_tokens;
        let output_cost = (output_tokens as f64 / 1000.0) * self.cost_per_1k_output_tokens;
        input_cost + output_cost
    }
}

// ============================================================================
// CAPABILITY MANAGER
// ============================================================================

/// Mapping of model name to capabilities with suitability queries.
#[derive(Debug, Clone, Default)]
pub struct CapabilityManager {
    models: HashMap<String, ModelCapabilities>,
}

impl CapabilityManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model(&mut self, name: impl Into<String>, capabilities: ModelCapabilities) {
        self.models.insert(name.into(), capabilities);
    }

    /// Registration and update share last-write-wins semantics.
    pub fn update_model(&mut self, name: impl Into<String>, capabilities: ModelCapabilities) {
        self.models.insert(name.into(), capabilities);
    }

    pub fn get_capabilities(&self, name: &str) -> Option<&ModelCapabilities> {
        self.models.get(name)
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    /// All registered models that satisfy the requirements.
    pub fn find_suitable_models(&self, req: &CapabilityRequirements) -> Vec<String> {
        let mut suitable: Vec<String> = self
            .models
            .iter()
            .filter(|(_, caps)| caps.supports_request(req))
            .map(|(name, _)| name.clone())
            .collect();
        suitable.sort();
        suitable
    }

    /// Cheapest suitable model for the given requirements and output size.
    pub fn find_cheapest_model(
        &self,
        req: &CapabilityRequirements,
        estimated_output_tokens: u64,
    ) -> Option<String> {
        let mut costs: Vec<(String, f64)> = self
            .find_suitable_models(req)
            .into_iter()
            .filter_map(|name| {
                self.models
                    .get(&name)
                    .map(|caps| (name.clone(), caps.estimate_cost(req.context_size, estimated_output_tokens)))
            })
            .collect();
        costs.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        costs.into_iter().next().map(|(name, _)| name)
    }

    /// Validate that a model can handle a request, naming the first
    /// capability it falls short on.
    pub fn validate_request(
        &self,
        model: &str,
        req: &CapabilityRequirements,
    ) -> Result<(), GatewayError> {
        let caps = self.models.get(model).ok_or_else(|| GatewayError::UnknownModel {
            model: model.to_string(),
        })?;

        if req.context_size > caps.max_context {
            return Err(GatewayError::CapabilityMismatch {
                model: model.to_string(),
                field: "max_context".to_string(),
                limit: caps.max_context,
                requested: req.context_size,
            });
        }
        if let Some(output) = req.output_size {
            if output > caps.max_output_tokens {
                return Err(GatewayError::CapabilityMismatch {
                    model: model.to_string(),
                    field: "max_output_tokens".to_string(),
                    limit: caps.max_output_tokens,
                    requested: output,
                });
            }
        }
        if req.requires_multimodal && !caps.multimodal {
            return Err(GatewayError::CapabilityMismatch {
                model: model.to_string(),
                field: "multimodal".to_string(),
                limit: 0,
                requested: 1,
            });
        }
        if req.requires_streaming && !caps.streaming {
            return Err(GatewayError::CapabilityMismatch {
                model: model.to_string(),
                field: "streaming".to_string(),
                limit: 0,
                requested: 1,
            });
        }
        if req.requires_function_calling && !caps.function_calling {
            return Err(GatewayError::CapabilityMismatch {
                model: model.to_string(),
                field: "function_calling".to_string(),
                limit: 0,
                requested: 1,
            });
        }
        Ok(())
    }
}

// ============================================================================
// MODEL REGISTRY (pre-configured defaults + aliases)
// ============================================================================

/// Registry of well-known models with alias resolution.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    manager: CapabilityManager,
    aliases: HashMap<String, String>,
}

impl ModelRegistry {
    /// Registry pre-populated with the common model table.
    pub fn with_defaults() -> Self {
        let mut manager = CapabilityManager::new();

        let base = |max_context, max_output_tokens| ModelCapabilities {
            max_context,
            max_output_tokens,
            multimodal: false,
            streaming: false,
            function_calling: false,
            supports_json_mode: false,
            supports_temperature: true,
            cost_per_1k_input_tokens: 0.0,
            cost_per_1k_output_tokens: 0.0,
        };

        manager.register_model(
            "gpt-4",
            base(128_000, 4_096)
                .with_flags(true, true, true)
                .with_json_mode(true)
                .with_costs(0.01, 0.03),
        );
        manager.register_model(
            "gpt-3.5-turbo",
            base(16_385, 4_096)
                .with_flags(false, true, true)
                .with_json_mode(true)
                .with_costs(0.0005, 0.0015),
        );
        manager.register_model(
            "claude-3-opus",
            base(200_000, 4_096)
                .with_flags(true, true, false)
                .with_costs(0.015, 0.075),
        );
        manager.register_model(
            "claude-3-sonnet",
            base(200_000, 4_096)
                .with_flags(true, true, false)
                .with_costs(0.003, 0.015),
        );
        manager.register_model(
            "gemini-2.0",
            base(1_000_000, 8_192)
                .with_flags(true, true, true)
                .with_json_mode(true)
                .with_costs(0.0025, 0.01),
        );

        let aliases = [
            ("gpt4", "gpt-4"),
            ("gpt-4-turbo", "gpt-4"),
            ("claude-opus", "claude-3-opus"),
            ("claude-sonnet", "claude-3-sonnet"),
            ("gemini-pro", "gemini-2.0"),
            ("gemini", "gemini-2.0"),
        ]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();

        Self { manager, aliases }
    }

    /// Resolve an alias to its canonical model name; unknown names pass
    /// through unchanged.
    pub fn resolve_model_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn has_model(&self, name: &str) -> bool {
        let resolved = self.resolve_model_name(name);
        self.manager.get_capabilities(resolved).is_some()
    }

    pub fn get_capabilities(&self, name: &str) -> Option<&ModelCapabilities> {
        let resolved = self.resolve_model_name(name);
        self.manager.get_capabilities(resolved)
    }

    pub fn register_custom_model(&mut self, name: impl Into<String>, capabilities: ModelCapabilities) {
        self.manager.register_model(name, capabilities);
    }

    pub fn manager(&self) -> &CapabilityManager {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_reject_zero_limits() {
        assert!(ModelCapabilities::new(0, 100).is_err());
        assert!(ModelCapabilities::new(100, 0).is_err());
        assert!(ModelCapabilities::new(100, 100).is_ok());
    }

    #[test]
    fn supports_request_checks_every_axis() {
        let caps = ModelCapabilities::new(1000, 100)
            .unwrap()
            .with_flags(false, true, false);

        assert!(caps.supports_request(&CapabilityRequirements {
            context_size: 1000,
            output_size: Some(100),
            ..Default::default()
        }));
        assert!(!caps.supports_request(&CapabilityRequirements {
            context_size: 1001,
            ..Default::default()
        }));
        assert!(!caps.supports_request(&CapabilityRequirements {
            context_size: 10,
            output_size: Some(101),
            ..Default::default()
        }));
        assert!(!caps.supports_request(&CapabilityRequirements {
            context_size: 10,
            requires_multimodal: true,
            ..Default::default()
        }));
    }

    #[test]
    fn cost_estimate_is_per_thousand_tokens() {
        let caps = ModelCapabilities::new(1000, 100).unwrap().with_costs(0.01, 0.03);
        let cost = caps.estimate_cost(1000, 1000);
        assert!((cost - 0.04).abs() < 1e-9);
    }

    #[test]
    fn cheapest_model_wins() {
        let mut manager = CapabilityManager::new();
        manager.register_model(
            "pricey",
            ModelCapabilities::new(10_000, 1_000).unwrap().with_costs(0.1, 0.3),
        );
        manager.register_model(
            "cheap",
            ModelCapabilities::new(10_000, 1_000).unwrap().with_costs(0.001, 0.002),
        );

        let req = CapabilityRequirements {
            context_size: 500,
            ..Default::default()
        };
        assert_eq!(manager.find_cheapest_model(&req, 100).as_deref(), Some("cheap"));
    }

    #[test]
    fn validate_request_names_the_failing_field() {
        let mut manager = CapabilityManager::new();
        manager.register_model("small", ModelCapabilities::new(100, 10).unwrap());

        let err = manager
            .validate_request(
                "small",
                &CapabilityRequirements {
                    context_size: 200,
                    ..Default::default()
                },
            )
            .unwrap_err();
        match err {
            GatewayError::CapabilityMismatch { field, limit, requested, .. } => {
                assert_eq!(field, "max_context");
                assert_eq!(limit, 100);
                assert_eq!(requested, 200);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn registry_resolves_aliases() {
        let registry = ModelRegistry::with_defaults();
        assert_eq!(registry.resolve_model_name("gpt4"), "gpt-4");
        assert!(registry.has_model("gpt4"));
        assert!(registry.has_model("claude-sonnet"));
        assert!(!registry.has_model("nope"));
    }

    #[test]
    fn custom_models_can_be_registered() {
        let mut registry = ModelRegistry::with_defaults();
        registry.register_custom_model("lab-model", ModelCapabilities::new(4_096, 512).unwrap());
        assert!(registry.has_model("lab-model"));
    }
}
