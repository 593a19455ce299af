//! Wise-authority guidance: re-activating deferred work.
//!
//! The agent posts deferral reports into a designated channel, tagged with
//! the deferred thought's id. A reply there from an authorized wise
//! authority containing `Thought ID: <id>` re-activates the source task
//! and enqueues a GUIDANCE thought combining the original content, the
//! deferral reason, and the authority's response.

use crate::buses::BusManager;
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::persistence::Persistence;
use crate::schemas::{
    ActionParameters, FinalAction, TaskStatus, Thought, ThoughtStatus, ThoughtType,
};
use crate::services::IncomingMessage;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};

/// Handles deferral-channel guidance messages
#[derive(Clone)]
pub struct WiseAuthorityGuidance {
    persistence: Arc<Persistence>,
    buses: Arc<BusManager>,
    clock: Arc<dyn Clock>,
    wa_user_id: String,
    deferral_channel: String,
}

impl WiseAuthorityGuidance {
    pub fn new(
        persistence: Arc<Persistence>,
        buses: Arc<BusManager>,
        clock: Arc<dyn Clock>,
        wa_user_id: impl Into<String>,
        deferral_channel: impl Into<String>,
    ) -> Self {
        Self {
            persistence,
            buses,
            clock,
            wa_user_id: wa_user_id.into(),
            deferral_channel: deferral_channel.into(),
        }
    }

    /// Process a message observed in the deferral channel
    ///
    /// Returns the created GUIDANCE thought when the message resolved a
    /// deferral, `None` when the message was not guidance (wrong channel,
    /// unauthorized author, or no thought tag).
    pub async fn handle_message(&self, message: &IncomingMessage) -> Result<Option<Thought>> {
        if message.channel_id != self.deferral_channel {
            return Ok(None);
        }

        let Some(thought_id) = extract_thought_id(&message.content) else {
            return Ok(None);
        };

        if message.author_id != self.wa_user_id {
            warn!(
                author = %message.author_id,
                "Ignoring deferral-channel guidance from unauthorized user"
            );
            return Ok(None);
        }

        let deferred = self
            .persistence
            .thoughts
            .get(&thought_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("thought {}", thought_id)))?;

        if deferred.status != ThoughtStatus::Deferred {
            warn!(
                thought_id = %thought_id,
                status = deferred.status.as_str(),
                "Guidance targets a thought that is not deferred"
            );
            return Ok(None);
        }

        let task = self
            .persistence
            .tasks
            .get(&deferred.source_task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("task {}", deferred.source_task_id)))?;

        // Re-activate the source task (a no-op when it is still active)
        if task.status == TaskStatus::Pending || task.status == TaskStatus::Deferred {
            self.persistence
                .tasks
                .update_status(&task.task_id, TaskStatus::Active, self.clock.now())
                .await?;
        }

        let deferral_reason = match &deferred.final_action {
            Some(FinalAction::Action {
                parameters: ActionParameters::Defer(p),
                ..
            }) => p.reason.clone(),
            _ => "unspecified".to_string(),
        };

        let mut guidance = Thought::new(
            &deferred.source_task_id,
            ThoughtType::Guidance,
            format!(
                "Original thought: {}\nDeferred because: {}\nWise authority guidance: {}",
                deferred.content, deferral_reason, message.content
            ),
            0,
            self.clock.now(),
        );
        guidance.parent_thought_id = Some(deferred.thought_id.clone());
        guidance.context = deferred.context.clone();

        self.persistence.thoughts.insert(&guidance).await?;

        info!(
            thought_id = %thought_id,
            guidance_id = %guidance.thought_id,
            "Wise-authority guidance accepted; task re-activated"
        );

        let confirmation = format!(
            "Guidance received for thought {}; the task has been re-activated.",
            thought_id
        );
        if let Err(e) = self
            .buses
            .send_message(&self.deferral_channel, &confirmation, "guidance_handler")
            .await
        {
            warn!(error = %e, "Failed to confirm guidance in the deferral channel");
        }

        Ok(Some(guidance))
    }
}

/// Extract `Thought ID: <id>` from a message
pub fn extract_thought_id(content: &str) -> Option<String> {
    let re = Regex::new(r"Thought ID:\s*([A-Za-z0-9_\-]+)").expect("static regex");
    re.captures(content).map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_thought_id() {
        assert_eq!(
            extract_thought_id("proceed with option A. Thought ID: th-XYZ"),
            Some("th-XYZ".to_string())
        );
        assert_eq!(
            extract_thought_id("Thought ID:th-123-abc done"),
            Some("th-123-abc".to_string())
        );
        assert_eq!(extract_thought_id("no tag here"), None);
    }
}
