//! Action dispatcher (C9): executes selected actions and persists their
//! outcomes.
//!
//! Every dispatch records a correlation, routes the action through the
//! appropriate bus, updates the thought and task, and appends an audit
//! entry. Terminal semantics per action:
//!
//! - SPEAK delivers the message and completes both thought and task
//! - TASK_COMPLETE completes both
//! - DEFER posts to the deferral channel (tagged with the thought id),
//!   marks the thought DEFERRED, and leaves the task ACTIVE for guidance
//! - REJECT completes the thought, fails the task, and explains in the
//!   origin channel
//! - PONDER completes the thought and enqueues a deeper follow-up
//! - OBSERVE / MEMORIZE / RECALL / FORGET / TOOL complete the thought and
//!   enqueue a follow-up carrying the result, so multi-step work continues

use crate::buses::BusManager;
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::persistence::Persistence;
use crate::schemas::{
    ActionParameters, ActionSelectionResult, ActionType, AttrValue, CorrelationStatus, DispatchContext,
    FinalAction, GraphNode, NodeType, ServiceCorrelation, TaskOutcome, TaskStatus, Thought,
    ThoughtStatus, ThoughtType,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Executes actions selected by the pipeline
#[derive(Clone)]
pub struct ActionDispatcher {
    persistence: Arc<Persistence>,
    buses: Arc<BusManager>,
    clock: Arc<dyn Clock>,
    deferral_channel: String,
    max_thought_depth: i32,
}

impl ActionDispatcher {
    pub fn new(
        persistence: Arc<Persistence>,
        buses: Arc<BusManager>,
        clock: Arc<dyn Clock>,
        deferral_channel: impl Into<String>,
        max_thought_depth: i32,
    ) -> Self {
        Self {
            persistence,
            buses,
            clock,
            deferral_channel: deferral_channel.into(),
            max_thought_depth,
        }
    }

    pub fn deferral_channel(&self) -> &str {
        &self.deferral_channel
    }

    /// Execute one selected action
    pub async fn dispatch(
        &self,
        selection: &ActionSelectionResult,
        thought: &Thought,
        ctx: &DispatchContext,
    ) -> Result<()> {
        if ctx.channel_id.trim().is_empty() {
            return Err(EngineError::Dispatch(format!(
                "empty channel_id at dispatch for thought {}",
                thought.thought_id
            )));
        }

        let correlation = ServiceCorrelation {
            correlation_id: ctx.correlation_id.clone(),
            ..ServiceCorrelation::request(
                "dispatch",
                &ctx.handler_name,
                selection.selected_action.as_str(),
                Some(serde_json::json!({
                    "thought_id": ctx.thought_id,
                    "task_id": ctx.task_id,
                    "channel_id": ctx.channel_id,
                })),
                self.clock.now(),
            )
        };
        self.buses.telemetry().record(&correlation).await?;

        info!(
            thought_id = %thought.thought_id,
            action = selection.selected_action.as_str(),
            channel = %ctx.channel_id,
            "Dispatching action"
        );

        let started = std::time::Instant::now();
        let outcome = self.execute(selection, thought, ctx).await;
        let latency_ms = started.elapsed().as_millis() as f64;

        match &outcome {
            Ok(summary) => {
                self.buses
                    .telemetry()
                    .complete(
                        &ctx.correlation_id,
                        CorrelationStatus::Completed,
                        Some(serde_json::json!({ "latency_ms": latency_ms, "outcome": summary })),
                    )
                    .await?;

                self.audit_action(selection, ctx, Some(summary)).await;
                Ok(())
            }
            Err(e) => {
                warn!(thought_id = %thought.thought_id, error = %e, "Dispatch failed");

                self.buses
                    .telemetry()
                    .complete(
                        &ctx.correlation_id,
                        CorrelationStatus::Failed,
                        Some(serde_json::json!({ "latency_ms": latency_ms, "error": e.to_string() })),
                    )
                    .await?;

                // The thought fails; the task remains so it can be retried
                self.persistence
                    .thoughts
                    .update_status(
                        &thought.thought_id,
                        ThoughtStatus::Failed,
                        Some(&FinalAction::error("dispatch_failure", e.to_string())),
                        self.clock.now(),
                    )
                    .await?;

                self.audit_action(selection, ctx, None).await;
                Err(EngineError::Dispatch(e.to_string()))
            }
        }
    }

    /// Run the handler for the selected action; returns an outcome summary
    async fn execute(
        &self,
        selection: &ActionSelectionResult,
        thought: &Thought,
        ctx: &DispatchContext,
    ) -> Result<String> {
        match &selection.parameters {
            ActionParameters::Speak(params) => {
                self.buses
                    .send_message(&ctx.channel_id, &params.content, "speak_handler")
                    .await?;

                self.complete_thought(thought, selection).await?;
                self.complete_task(&thought.source_task_id, &params.content).await?;
                Ok(format!("spoke in {}", ctx.channel_id))
            }

            ActionParameters::Observe(params) => {
                let channel = params
                    .channel_id
                    .clone()
                    .unwrap_or_else(|| ctx.channel_id.clone());

                self.complete_thought(thought, selection).await?;
                self.enqueue_follow_up(
                    thought,
                    ThoughtType::Observation,
                    format!(
                        "Observation of channel {} requested (active: {}). Incorporate anything newly observed.",
                        channel, params.active
                    ),
                    Vec::new(),
                    ctx.round_number,
                )
                .await?;
                Ok(format!("observing {}", channel))
            }

            ActionParameters::Memorize(params) => {
                let memory = self.buses.memory()?;
                let node_id = format!("concept/{}", uuid::Uuid::new_v4());
                let mut node =
                    GraphNode::new(&node_id, NodeType::Concept, params.scope, self.clock.now())
                        .with_attr("description", params.knowledge_unit_description.as_str())
                        .with_attr("data", AttrValue::Json(params.knowledge_data.clone()));
                if !params.tags.is_empty() {
                    node = node.with_attr(
                        "tags",
                        AttrValue::Json(serde_json::json!(params.tags.clone())),
                    );
                }
                memory.memorize(&node).await?;

                self.complete_thought(thought, selection).await?;
                self.enqueue_follow_up(
                    thought,
                    ThoughtType::Standard,
                    format!(
                        "Stored \"{}\" as {}. Continue the task with this knowledge in place.",
                        params.knowledge_unit_description, node_id
                    ),
                    Vec::new(),
                    ctx.round_number,
                )
                .await?;
                Ok(format!("memorized {}", node_id))
            }

            ActionParameters::Recall(params) => {
                let memory = self.buses.memory()?;
                let recalled = memory.recall(&params.node_id, params.scope).await?;

                let content = match &recalled {
                    Some(node) => format!(
                        "Recalled {}: {}. Continue the task with this knowledge.",
                        node.node_id,
                        serde_json::to_string(&node.attributes)?
                    ),
                    None => format!(
                        "Nothing found in memory for {}. Continue the task without it.",
                        params.node_id
                    ),
                };

                self.complete_thought(thought, selection).await?;
                self.enqueue_follow_up(
                    thought,
                    ThoughtType::Standard,
                    content,
                    Vec::new(),
                    ctx.round_number,
                )
                .await?;
                Ok(format!("recalled {}", params.node_id))
            }

            ActionParameters::Forget(params) => {
                let memory = self.buses.memory()?;
                let removed = memory.forget(&params.node_id, params.scope).await?;

                self.complete_thought(thought, selection).await?;
                self.enqueue_follow_up(
                    thought,
                    ThoughtType::Standard,
                    format!(
                        "Forgot {} ({}): {}. Continue the task.",
                        params.node_id,
                        params.reason,
                        if removed { "removed" } else { "was not present" }
                    ),
                    Vec::new(),
                    ctx.round_number,
                )
                .await?;
                Ok(format!("forgot {}", params.node_id))
            }

            ActionParameters::Tool(params) => {
                let result = self
                    .buses
                    .execute_tool(
                        &params.tool_name,
                        serde_json::Value::Object(params.arguments.clone()),
                        "tool_handler",
                    )
                    .await?;

                self.complete_thought(thought, selection).await?;
                self.enqueue_follow_up(
                    thought,
                    ThoughtType::Standard,
                    format!(
                        "Tool {} returned: {}. Continue the task with this result.",
                        params.tool_name, result
                    ),
                    Vec::new(),
                    ctx.round_number,
                )
                .await?;
                Ok(format!("executed tool {}", params.tool_name))
            }

            ActionParameters::Defer(params) => {
                let report = format!(
                    "DEFERRAL: {} (Thought ID: {})",
                    params.reason, thought.thought_id
                );
                self.buses
                    .send_message(&self.deferral_channel, &report, "defer_handler")
                    .await?;

                self.persistence
                    .thoughts
                    .update_status(
                        &thought.thought_id,
                        ThoughtStatus::Deferred,
                        Some(&FinalAction::Action {
                            action: ActionType::Defer,
                            parameters: selection.parameters.clone(),
                            rationale: selection.rationale.clone(),
                        }),
                        self.clock.now(),
                    )
                    .await?;
                // Task stays ACTIVE until wise-authority guidance arrives
                Ok(format!("deferred: {}", params.reason))
            }

            ActionParameters::Reject(params) => {
                self.buses
                    .send_message(
                        &ctx.channel_id,
                        &format!("Unable to proceed with this task: {}", params.reason),
                        "reject_handler",
                    )
                    .await?;

                self.complete_thought(thought, selection).await?;
                self.persistence
                    .tasks
                    .update_status(&thought.source_task_id, TaskStatus::Failed, self.clock.now())
                    .await?;
                self.persistence
                    .tasks
                    .set_outcome(
                        &thought.source_task_id,
                        &TaskOutcome::new(format!("rejected: {}", params.reason)),
                        self.clock.now(),
                    )
                    .await?;
                Ok(format!("rejected: {}", params.reason))
            }

            ActionParameters::Ponder(params) => {
                self.complete_thought(thought, selection).await?;

                if thought.thought_depth + 1 > self.max_thought_depth {
                    // Selection bounds normally prevent this; a lineage at
                    // the depth limit defers instead of deepening.
                    let report = format!(
                        "DEFERRAL: thought depth limit reached (Thought ID: {})",
                        thought.thought_id
                    );
                    self.buses
                        .send_message(&self.deferral_channel, &report, "defer_handler")
                        .await?;
                    return Ok("ponder exceeded depth; deferred".to_string());
                }

                self.enqueue_follow_up(
                    thought,
                    ThoughtType::Standard,
                    thought.content.clone(),
                    params.key_questions.clone(),
                    ctx.round_number,
                )
                .await?;
                Ok(format!("pondering {} questions", params.key_questions.len()))
            }

            ActionParameters::TaskComplete(params) => {
                self.complete_thought(thought, selection).await?;
                self.complete_task(&thought.source_task_id, &params.completion_reason)
                    .await?;
                Ok(format!("task complete: {}", params.completion_reason))
            }
        }
    }

    async fn complete_thought(
        &self,
        thought: &Thought,
        selection: &ActionSelectionResult,
    ) -> Result<()> {
        self.persistence
            .thoughts
            .update_status(
                &thought.thought_id,
                ThoughtStatus::Completed,
                Some(&FinalAction::Action {
                    action: selection.selected_action,
                    parameters: selection.parameters.clone(),
                    rationale: selection.rationale.clone(),
                }),
                self.clock.now(),
            )
            .await?;
        Ok(())
    }

    async fn complete_task(&self, task_id: &str, summary: &str) -> Result<()> {
        self.persistence
            .tasks
            .update_status(task_id, TaskStatus::Completed, self.clock.now())
            .await?;
        self.persistence
            .tasks
            .set_outcome(task_id, &TaskOutcome::new(summary), self.clock.now())
            .await?;
        Ok(())
    }

    async fn enqueue_follow_up(
        &self,
        parent: &Thought,
        thought_type: ThoughtType,
        content: String,
        ponder_notes: Vec<String>,
        round_number: i32,
    ) -> Result<Option<Thought>> {
        if parent.thought_depth + 1 > self.max_thought_depth {
            warn!(
                thought_id = %parent.thought_id,
                depth = parent.thought_depth,
                "Follow-up would exceed depth limit; not enqueued"
            );
            return Ok(None);
        }

        let mut follow_up =
            Thought::follow_up(parent, thought_type, content, round_number, self.clock.now());
        follow_up.context.ponder_notes = ponder_notes;

        self.persistence.thoughts.insert(&follow_up).await?;
        Ok(Some(follow_up))
    }

    async fn audit_action(
        &self,
        selection: &ActionSelectionResult,
        ctx: &DispatchContext,
        outcome: Option<&String>,
    ) {
        let Ok(audit) = self.buses.audit() else {
            warn!("Audit service unavailable; action not audited");
            return;
        };

        let payload = serde_json::json!({
            "action": selection.selected_action.as_str(),
            "thought_id": ctx.thought_id,
            "task_id": ctx.task_id,
            "channel_id": ctx.channel_id,
            "event_summary": ctx.event_summary,
            "outcome": outcome,
        });

        if let Err(e) = audit
            .log_action(selection.selected_action.as_str(), "agent", payload)
            .await
        {
            warn!(error = %e, "Failed to append audit entry for action");
        }
    }
}
