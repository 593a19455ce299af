//! Thought processor: context build → DMA pipeline → conscience review.
//!
//! One recursive re-selection is permitted per thought per round; a second
//! conscience failure forces PONDER.

use crate::conscience::{Conscience, ConscienceOutcome};
use crate::context::{BatchContext, ContextBuilder};
use crate::dma::DmaPipeline;
use crate::error::Result;
use crate::schemas::dma::FLAG_STRUCTURED_FAILURE;
use crate::schemas::{
    ActionSelectionResult, ConscienceVerdict, SystemSnapshot, Task, Thought,
};
use std::sync::Arc;
use tracing::info;

/// Outcome of fully processing one thought
#[derive(Debug, Clone)]
pub struct ProcessedThought {
    pub selection: ActionSelectionResult,
    pub snapshot: SystemSnapshot,
    pub verdicts: Vec<ConscienceVerdict>,
}

/// Runs one thought through the full evaluation stack
#[derive(Clone)]
pub struct ThoughtProcessor {
    context: Arc<ContextBuilder>,
    dma: Arc<DmaPipeline>,
    conscience: Arc<Conscience>,
}

impl ThoughtProcessor {
    pub fn new(
        context: Arc<ContextBuilder>,
        dma: Arc<DmaPipeline>,
        conscience: Arc<Conscience>,
    ) -> Self {
        Self {
            context,
            dma,
            conscience,
        }
    }

    pub fn context_builder(&self) -> &Arc<ContextBuilder> {
        &self.context
    }

    /// Build a batch context for a processing round
    pub async fn batch_context(&self) -> Result<BatchContext> {
        self.context.build_batch().await
    }

    /// Evaluate one thought end to end
    pub async fn process(
        &self,
        thought: &Thought,
        task: Option<&Task>,
        batch: &BatchContext,
    ) -> Result<ProcessedThought> {
        let snapshot = self.context.build_snapshot(task, thought, batch).await?;

        // Apply the breach action before spending any model budget
        if let Some((action, reason)) = self.context.resource_breach() {
            use crate::schemas::ResourceAction;
            match action {
                ResourceAction::Throttle => {
                    info!(reason = %reason, "Resource throttle; delaying thought");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
                ResourceAction::Defer => {
                    return Ok(ProcessedThought {
                        selection: ActionSelectionResult::defer_with_reason(format!(
                            "resource budget breached: {}",
                            reason
                        )),
                        snapshot,
                        verdicts: Vec::new(),
                    });
                }
                ResourceAction::Reject => {
                    return Err(crate::error::EngineError::ResourceBreach(reason));
                }
                ResourceAction::Shutdown => {
                    self.context
                        .shutdown_coordinator()
                        .request_shutdown(format!("resource budget breached: {}", reason));
                    return Ok(ProcessedThought {
                        selection: ActionSelectionResult::defer_with_reason(format!(
                            "shutting down on resource breach: {}",
                            reason
                        )),
                        snapshot,
                        verdicts: Vec::new(),
                    });
                }
            }
        }

        let outcome = self.dma.run(thought, task, &snapshot).await?;
        let mut selection = outcome.selection;

        match self.conscience.review(&selection, thought, &snapshot).await {
            ConscienceOutcome::Clear(verdicts) => Ok(ProcessedThought {
                selection,
                snapshot,
                verdicts,
            }),

            ConscienceOutcome::Override {
                replacement,
                verdicts,
            } => {
                info!(
                    thought_id = %thought.thought_id,
                    "Conscience overrode action to {}",
                    replacement.selected_action
                );
                Ok(ProcessedThought {
                    selection: replacement,
                    snapshot,
                    verdicts,
                })
            }

            ConscienceOutcome::Reevaluate {
                failure_context, ..
            } => {
                // Exactly one recursive re-selection per thought per round
                selection = self
                    .dma
                    .select_action(
                        thought,
                        task,
                        &snapshot,
                        &outcome.ethical,
                        &outcome.common_sense,
                        &outcome.domain,
                        Some(&failure_context),
                    )
                    .await;

                match self.conscience.review(&selection, thought, &snapshot).await {
                    ConscienceOutcome::Clear(verdicts) => Ok(ProcessedThought {
                        selection,
                        snapshot,
                        verdicts,
                    }),
                    ConscienceOutcome::Override {
                        replacement,
                        verdicts,
                    } => Ok(ProcessedThought {
                        selection: replacement,
                        snapshot,
                        verdicts,
                    }),
                    ConscienceOutcome::Reevaluate {
                        failure_context,
                        verdicts,
                    } => {
                        info!(
                            thought_id = %thought.thought_id,
                            "Second conscience failure; forcing PONDER"
                        );
                        Ok(ProcessedThought {
                            selection: ActionSelectionResult::ponder_fallback(
                                vec![format!(
                                    "conscience rejected the selection twice: {}",
                                    failure_context
                                )],
                                FLAG_STRUCTURED_FAILURE,
                            ),
                            snapshot,
                            verdicts,
                        })
                    }
                }
            }
        }
    }
}
