//! Decision-making pipeline (C7).
//!
//! Per thought: the ethical, common-sense, and domain evaluators run
//! concurrently, then action selection consumes all three. Every
//! evaluator issues a structured LLM call with a fixed response shape,
//! retried up to [`DMA_RETRY_LIMIT`] with a per-call timeout of
//! [`DMA_TIMEOUT_SECS`]. Failures never take down the round: an evaluator
//! that cannot produce a result emits a flagged fallback, and a flagged
//! pipeline resolves to PONDER.

pub mod prompts;

use crate::buses::BusManager;
use crate::error::{EngineError, Result};
use crate::schemas::dma::RawActionSelection;
use crate::schemas::{
    ActionParameters, ActionSelectionResult, ActionType, AgentIdentity, CommonSenseAssessment,
    DmaOutcome, DomainAssessment, EthicalAssessment, SystemSnapshot, Task, Thought,
    dma::FLAG_STRUCTURED_FAILURE,
};
use llm::Message;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tooling::async_utils::{with_retry, with_timeout, RetryPolicy, TimeoutError};
use tracing::{debug, warn};

/// Retries per structured evaluator call
pub const DMA_RETRY_LIMIT: usize = 3;
/// Per-call timeout in seconds
pub const DMA_TIMEOUT_SECS: u64 = 30;

/// Workflow limits the selector enforces
#[derive(Debug, Clone, Copy)]
pub struct WorkflowLimits {
    /// Ponder/recursion cap per lineage before auto-defer
    pub max_rounds: i32,
    /// Maximum thought depth before auto-defer
    pub max_thought_depth: i32,
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            max_rounds: 7,
            max_thought_depth: 7,
        }
    }
}

/// The four-evaluator pipeline
#[derive(Clone)]
pub struct DmaPipeline {
    buses: Arc<BusManager>,
    identity: Arc<AgentIdentity>,
    limits: WorkflowLimits,
    retry: RetryPolicy,
    call_timeout: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl DmaPipeline {
    pub fn new(buses: Arc<BusManager>, identity: Arc<AgentIdentity>, limits: WorkflowLimits) -> Self {
        Self {
            buses,
            identity,
            limits,
            retry: RetryPolicy::new(DMA_RETRY_LIMIT).with_initial_interval(0.5),
            call_timeout: Duration::from_secs(DMA_TIMEOUT_SECS),
            max_tokens: 1024,
            temperature: 0.0,
        }
    }

    /// Override the retry/timeout envelope (tests use tight values)
    pub fn with_call_policy(mut self, retry: RetryPolicy, call_timeout: Duration) -> Self {
        self.retry = retry;
        self.call_timeout = call_timeout;
        self
    }

    /// Run the full pipeline for one thought
    pub async fn run(
        &self,
        thought: &Thought,
        task: Option<&Task>,
        snapshot: &SystemSnapshot,
    ) -> Result<DmaOutcome> {
        let (ethical, common_sense, domain) = tokio::join!(
            self.evaluate_ethical(thought, snapshot),
            self.evaluate_common_sense(thought, snapshot),
            self.evaluate_domain(thought, snapshot),
        );

        let selection = self
            .select_action(thought, task, snapshot, &ethical, &common_sense, &domain, None)
            .await;

        Ok(DmaOutcome {
            ethical,
            common_sense,
            domain,
            selection,
        })
    }

    /// Ethical evaluator; infallible by fallback
    pub async fn evaluate_ethical(
        &self,
        thought: &Thought,
        snapshot: &SystemSnapshot,
    ) -> EthicalAssessment {
        let messages = vec![
            Message::system(prompts::ethical_system_prompt()),
            Message::user(prompts::thought_user_prompt(thought, snapshot)),
        ];

        match self.structured_call::<EthicalAssessment>("ethical_dma", &messages).await {
            Ok(assessment) => assessment,
            Err(e) => {
                warn!(thought_id = %thought.thought_id, error = %e, "Ethical evaluator fell back");
                EthicalAssessment::fallback(FLAG_STRUCTURED_FAILURE, &e.to_string())
            }
        }
    }

    /// Common-sense evaluator; infallible by fallback
    pub async fn evaluate_common_sense(
        &self,
        thought: &Thought,
        snapshot: &SystemSnapshot,
    ) -> CommonSenseAssessment {
        let messages = vec![
            Message::system(prompts::common_sense_system_prompt(
                &self.identity.core_profile.common_sense_overrides,
            )),
            Message::user(prompts::thought_user_prompt(thought, snapshot)),
        ];

        match self
            .structured_call::<CommonSenseAssessment>("common_sense_dma", &messages)
            .await
        {
            Ok(mut assessment) => {
                assessment.plausibility_score = assessment.plausibility_score.clamp(0.0, 1.0);
                assessment
            }
            Err(e) => {
                warn!(thought_id = %thought.thought_id, error = %e, "Common-sense evaluator fell back");
                CommonSenseAssessment::fallback(FLAG_STRUCTURED_FAILURE, &e.to_string())
            }
        }
    }

    /// Domain evaluator; domain and knowledge come from the profile
    pub async fn evaluate_domain(
        &self,
        thought: &Thought,
        snapshot: &SystemSnapshot,
    ) -> DomainAssessment {
        let domain = prompts::profile_domain(&self.identity);
        let messages = vec![
            Message::system(prompts::domain_system_prompt(
                &domain,
                &self.identity.core_profile.domain_knowledge,
            )),
            Message::user(prompts::thought_user_prompt(thought, snapshot)),
        ];

        match self
            .structured_call::<DomainAssessment>("domain_dma", &messages)
            .await
        {
            Ok(mut assessment) => {
                assessment.score = assessment.score.clamp(0.0, 1.0);
                assessment
            }
            Err(e) => {
                warn!(thought_id = %thought.thought_id, error = %e, "Domain evaluator fell back");
                DomainAssessment::fallback(&domain, FLAG_STRUCTURED_FAILURE, &e.to_string())
            }
        }
    }

    /// Action selection over the three evaluator outputs
    ///
    /// `failure_context` carries a conscience rejection into the one
    /// permitted re-selection.
    #[allow(clippy::too_many_arguments)]
    pub async fn select_action(
        &self,
        thought: &Thought,
        _task: Option<&Task>,
        snapshot: &SystemSnapshot,
        ethical: &EthicalAssessment,
        common_sense: &CommonSenseAssessment,
        domain: &DomainAssessment,
        failure_context: Option<&str>,
    ) -> ActionSelectionResult {
        let permitted = &self.identity.permitted_actions;
        if permitted.is_empty() {
            return ActionSelectionResult::defer_with_reason(
                "no permitted actions configured for this agent",
            );
        }

        // A flagged evaluator means this thought could not be properly
        // assessed; it ponders rather than acts.
        let upstream_flagged = [&ethical.flags, &common_sense.flags, &domain.flags]
            .iter()
            .any(|flags| flags.iter().any(|f| f == FLAG_STRUCTURED_FAILURE));
        if upstream_flagged {
            return self.bounded(
                thought,
                ActionSelectionResult::ponder_fallback(
                    vec!["an evaluator failed to produce structured output; what is known about this thought?".to_string()],
                    FLAG_STRUCTURED_FAILURE,
                ),
            );
        }

        let messages = vec![
            Message::system(prompts::action_selection_system_prompt(
                permitted,
                &self.identity.core_profile.action_selection_overrides,
            )),
            Message::user(prompts::action_selection_user_prompt(
                thought,
                snapshot,
                ethical,
                common_sense,
                domain,
                failure_context,
            )),
        ];

        let raw = match self
            .structured_call::<RawActionSelection>("action_selection_dma", &messages)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(thought_id = %thought.thought_id, error = %e, "Action selection fell back");
                return self.bounded(
                    thought,
                    ActionSelectionResult::ponder_fallback(
                        vec![format!("action selection failed: {}", e)],
                        FLAG_STRUCTURED_FAILURE,
                    ),
                );
            }
        };

        let selection = self.validate_selection(thought, raw);
        self.bounded(thought, selection)
    }

    /// Validate the raw model output into a typed selection
    fn validate_selection(
        &self,
        thought: &Thought,
        raw: RawActionSelection,
    ) -> ActionSelectionResult {
        let Some(action) = ActionType::parse(&raw.selected_action) else {
            return ActionSelectionResult::ponder_fallback(
                vec![format!(
                    "validation error: unknown action '{}'",
                    raw.selected_action
                )],
                FLAG_STRUCTURED_FAILURE,
            );
        };

        if !self.identity.is_permitted(action) {
            return ActionSelectionResult::ponder_fallback(
                vec![format!(
                    "validation error: action '{}' is not permitted for this agent",
                    action
                )],
                FLAG_STRUCTURED_FAILURE,
            );
        }

        match ActionParameters::parse(action, &raw.action_parameters) {
            Ok(parameters) => ActionSelectionResult {
                selected_action: action,
                parameters,
                rationale: raw
                    .rationale
                    .unwrap_or_else(|| "no rationale provided".to_string()),
                monitoring: raw.monitoring,
                context_summary: raw.context_summary,
                flags: Vec::new(),
            },
            Err(validation_error) => {
                debug!(thought_id = %thought.thought_id, error = %validation_error, "Parameter validation failed");
                ActionSelectionResult::ponder_fallback(
                    vec![validation_error],
                    FLAG_STRUCTURED_FAILURE,
                )
            }
        }
    }

    /// Enforce depth and round bounds: a PONDER that would exceed either
    /// becomes a DEFER.
    fn bounded(&self, thought: &Thought, selection: ActionSelectionResult) -> ActionSelectionResult {
        if selection.selected_action != ActionType::Ponder {
            return selection;
        }

        if thought.thought_depth + 1 > self.limits.max_thought_depth {
            return ActionSelectionResult::defer_with_reason(format!(
                "maximum thought depth {} reached; deferring to a wise authority",
                self.limits.max_thought_depth
            ));
        }
        if thought.round_number >= self.limits.max_rounds {
            return ActionSelectionResult::defer_with_reason(format!(
                "maximum rounds {} reached without resolution; deferring to a wise authority",
                self.limits.max_rounds
            ));
        }

        selection
    }

    /// One structured call with retry and timeout
    async fn structured_call<T: DeserializeOwned>(
        &self,
        handler_name: &str,
        messages: &[Message],
    ) -> Result<T> {
        let value = with_retry(
            &self.retry,
            handler_name,
            |e: &EngineError| matches!(e, EngineError::LlmTransport(_)),
            || async {
                match with_timeout(
                    self.call_timeout,
                    self.buses.call_llm_structured(
                        messages,
                        self.max_tokens,
                        self.temperature,
                        handler_name,
                    ),
                )
                .await
                {
                    Ok(value) => Ok(value),
                    Err(TimeoutError::OperationFailed(e)) => Err(e),
                    Err(TimeoutError::Timeout(d)) => Err(EngineError::LlmTransport(format!(
                        "structured call timed out after {:?}",
                        d
                    ))),
                }
            },
        )
        .await?;

        serde_json::from_value(value)
            .map_err(|e| EngineError::LlmStructured(format!("response shape mismatch: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{Database, MigrationSet};
    use crate::registry::{ProviderHandle, ServiceRegistry};
    use crate::schemas::ThoughtType;
    use crate::telemetry::TelemetryService;
    use chrono::Utc;
    use llm::providers::{MockFailure, MockLlmClient};
    use serde_json::json;

    async fn pipeline_with(
        mock: Arc<MockLlmClient>,
        identity: AgentIdentity,
        limits: WorkflowLimits,
    ) -> DmaPipeline {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let telemetry = Arc::new(TelemetryService::new(
            db,
            Arc::new(FixedClock::default_start()),
        ));
        let registry = Arc::new(ServiceRegistry::new());
        registry.register("mock", 0, vec![], ProviderHandle::Llm(mock));
        let buses = Arc::new(BusManager::new(registry, telemetry));

        DmaPipeline::new(buses, Arc::new(identity), limits).with_call_policy(
            RetryPolicy::new(2).with_initial_interval(0.0).with_jitter(false),
            Duration::from_secs(5),
        )
    }

    fn thought() -> Thought {
        Thought::new("task-1", ThoughtType::Seed, "greet the user", 0, Utc::now())
    }

    #[tokio::test]
    async fn test_full_run_selects_speak() {
        let mock = Arc::new(MockLlmClient::new());
        let pipeline = pipeline_with(
            mock.clone(),
            AgentIdentity::from_template("aegis", Utc::now()),
            WorkflowLimits::default(),
        )
        .await;

        let outcome = pipeline
            .run(&thought(), None, &SystemSnapshot::default())
            .await
            .unwrap();

        assert_eq!(outcome.selection.selected_action, ActionType::Speak);
        assert!(outcome.selection.flags.is_empty());
        assert!(outcome.common_sense.plausibility_score > 0.5);
        // Three evaluators plus selection
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test]
    async fn test_invalid_parameters_fall_back_to_ponder() {
        let mock = Arc::new(MockLlmClient::new());
        // MEMORIZE without the required knowledge_unit_description
        mock.push_action("memorize", json!({"knowledge_data": {"x": 1}}), "bad params");

        let pipeline = pipeline_with(
            mock,
            AgentIdentity::from_template("aegis", Utc::now()),
            WorkflowLimits::default(),
        )
        .await;

        let outcome = pipeline
            .run(&thought(), None, &SystemSnapshot::default())
            .await
            .unwrap();

        assert_eq!(outcome.selection.selected_action, ActionType::Ponder);
        match &outcome.selection.parameters {
            ActionParameters::Ponder(p) => {
                assert!(p.key_questions[0].contains("validation error"));
                assert!(p.key_questions[0].contains("knowledge_unit_description"));
            }
            other => panic!("wrong variant: {:?}", other),
        }
        assert!(outcome
            .selection
            .flags
            .contains(&FLAG_STRUCTURED_FAILURE.to_string()));
    }

    #[tokio::test]
    async fn test_non_permitted_action_rejected() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_action("tool", json!({"tool_name": "rm", "arguments": {}}), "try tool");

        let mut identity = AgentIdentity::from_template("aegis", Utc::now());
        identity.permitted_actions = vec![ActionType::Speak, ActionType::Ponder, ActionType::Defer];
        identity.record_modification();

        let pipeline = pipeline_with(mock, identity, WorkflowLimits::default()).await;
        let outcome = pipeline
            .run(&thought(), None, &SystemSnapshot::default())
            .await
            .unwrap();

        assert_eq!(outcome.selection.selected_action, ActionType::Ponder);
    }

    #[tokio::test]
    async fn test_empty_permitted_set_always_defers() {
        let mock = Arc::new(MockLlmClient::new());
        let mut identity = AgentIdentity::from_template("aegis", Utc::now());
        identity.permitted_actions.clear();
        identity.record_modification();

        let pipeline = pipeline_with(mock.clone(), identity, WorkflowLimits::default()).await;
        let outcome = pipeline
            .run(&thought(), None, &SystemSnapshot::default())
            .await
            .unwrap();

        assert_eq!(outcome.selection.selected_action, ActionType::Defer);
        // Selection never reached the model
        assert_eq!(mock.action_call_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_past_retries_becomes_ponder() {
        let mock = Arc::new(MockLlmClient::new());
        // Enough failures to exhaust retries on every evaluator call
        for _ in 0..16 {
            mock.push_failure(MockFailure::Transport("connection refused".into()));
        }

        let pipeline = pipeline_with(
            mock,
            AgentIdentity::from_template("aegis", Utc::now()),
            WorkflowLimits::default(),
        )
        .await;

        let outcome = pipeline
            .run(&thought(), None, &SystemSnapshot::default())
            .await
            .unwrap();

        assert_eq!(outcome.selection.selected_action, ActionType::Ponder);
        assert!(outcome
            .ethical
            .flags
            .contains(&FLAG_STRUCTURED_FAILURE.to_string()));
    }

    #[tokio::test]
    async fn test_depth_bound_converts_ponder_to_defer() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_action("ponder", json!({"key_questions": ["still unclear"]}), "again");

        let limits = WorkflowLimits {
            max_rounds: 7,
            max_thought_depth: 1,
        };
        let pipeline = pipeline_with(
            mock,
            AgentIdentity::from_template("aegis", Utc::now()),
            limits,
        )
        .await;

        // A thought already at depth 1: its follow-up would exceed the bound
        let mut deep = thought();
        deep.thought_depth = 1;

        let outcome = pipeline
            .run(&deep, None, &SystemSnapshot::default())
            .await
            .unwrap();

        assert_eq!(outcome.selection.selected_action, ActionType::Defer);
    }

    #[tokio::test]
    async fn test_round_cap_converts_ponder_to_defer() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_action("ponder", json!({"key_questions": ["what now?"]}), "again");

        let pipeline = pipeline_with(
            mock,
            AgentIdentity::from_template("aegis", Utc::now()),
            WorkflowLimits::default(),
        )
        .await;

        let mut late = thought();
        late.round_number = 7;

        let outcome = pipeline
            .run(&late, None, &SystemSnapshot::default())
            .await
            .unwrap();

        assert_eq!(outcome.selection.selected_action, ActionType::Defer);
    }
}
