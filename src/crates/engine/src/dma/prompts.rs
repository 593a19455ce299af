//! Prompt construction for the evaluators.
//!
//! Each evaluator names its exact response keys so any structured-output
//! model (or the mock) can match the schema. Identity profile overrides
//! are appended verbatim after the base prompt.

use crate::schemas::{
    ActionType, AgentIdentity, CommonSenseAssessment, DomainAssessment, EthicalAssessment,
    SystemSnapshot, Thought,
};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Domain identifier used when the profile declares none
pub const BASE_DOMAIN: &str = "general";

pub fn ethical_system_prompt() -> String {
    "You are the ethical evaluator of an autonomous agent. Assess the thought below \
     against the agent's principles: non-maleficence, honesty, respect for autonomy, \
     and fairness.\n\
     Respond with a single JSON object with keys: \"context\" (string), \
     \"alignment_check\" (string), \"conflicts\" (string or null), \"resolution\" \
     (string or null), \"decision\" (string), \"monitoring\" (string)."
        .to_string()
}

pub fn common_sense_system_prompt(overrides: &BTreeMap<String, String>) -> String {
    let mut prompt = "You are the common-sense evaluator of an autonomous agent. Judge whether \
     the thought below is physically and practically plausible.\n\
     Respond with a single JSON object with keys: \"plausibility_score\" (number in \
     [0,1]), \"flags\" (array of strings), \"reasoning\" (string)."
        .to_string();
    append_overrides(&mut prompt, overrides);
    prompt
}

pub fn domain_system_prompt(domain: &str, knowledge: &BTreeMap<String, String>) -> String {
    let mut prompt = format!(
        "You are the domain evaluator of an autonomous agent operating in the \"{}\" \
         domain. Judge the thought below against domain expectations.\n\
         Respond with a single JSON object with keys: \"domain\" (string), \"score\" \
         (number in [0,1]), \"recommended_action\" (string or null), \"flags\" (array \
         of strings), \"reasoning\" (string).",
        domain
    );
    if !knowledge.is_empty() {
        prompt.push_str("\nDomain knowledge:");
        for (key, value) in knowledge {
            let _ = write!(prompt, "\n- {}: {}", key, value);
        }
    }
    prompt
}

pub fn action_selection_system_prompt(
    permitted: &[ActionType],
    overrides: &BTreeMap<String, String>,
) -> String {
    let actions = permitted
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut prompt = format!(
        "You are the action selector of an autonomous agent. Considering the evaluator \
         outputs and system state below, choose exactly one action for this thought.\n\
         Permitted actions: {}.\n\
         Parameter shapes: speak {{\"content\"}}, observe {{\"channel_id\"?, \"active\"?}}, \
         memorize {{\"knowledge_unit_description\", \"knowledge_data\", \"scope\"?}}, \
         recall {{\"node_id\", \"scope\"?}}, forget {{\"node_id\", \"reason\"}}, \
         tool {{\"tool_name\", \"arguments\"}}, defer {{\"reason\", \"context\"?}}, \
         reject {{\"reason\"}}, ponder {{\"key_questions\"}}, \
         task_complete {{\"completion_reason\"?}}.\n\
         Respond with a single JSON object with keys: \"selected_action\" (string), \
         \"action_parameters\" (object), \"rationale\" (string), \"monitoring\" (string \
         or null), \"context_summary\" (string or null).",
        actions
    );
    append_overrides(&mut prompt, overrides);
    prompt
}

/// Compact rendering of the snapshot for prompt context
pub fn format_snapshot(snapshot: &SystemSnapshot) -> String {
    let mut out = String::new();

    if let Some(identity) = &snapshot.agent_identity {
        let _ = writeln!(
            out,
            "Agent: {} ({})",
            identity.agent_id, identity.core_profile.description
        );
    }
    if let Some(channel) = &snapshot.channel_id {
        let _ = writeln!(out, "Channel: {}", channel);
    }
    if let Some(task) = &snapshot.current_task {
        let _ = writeln!(
            out,
            "Current task [{} p{}]: {}",
            task.status, task.priority, task.description
        );
    }
    if !snapshot.resource_alerts.is_empty() {
        for alert in &snapshot.resource_alerts {
            let _ = writeln!(out, "{}", alert);
        }
    }
    if let Some(shutdown) = &snapshot.shutdown_context {
        let _ = writeln!(out, "SHUTDOWN PENDING: {}", shutdown.reason);
    }
    if !snapshot.top_pending_tasks.is_empty() {
        let _ = writeln!(out, "Open tasks: {}", snapshot.top_pending_tasks.len());
    }
    if !snapshot.available_tools.is_empty() {
        let _ = writeln!(out, "Tools: {}", snapshot.available_tools.join(", "));
    }
    for profile in &snapshot.user_profiles {
        let _ = writeln!(
            out,
            "User {}: {}",
            profile.user_id,
            profile.display_name.as_deref().unwrap_or("(unknown)")
        );
    }

    out
}

pub fn thought_user_prompt(thought: &Thought, snapshot: &SystemSnapshot) -> String {
    let mut prompt = format!(
        "System state:\n{}\nThought (type {}, depth {}):\n{}",
        format_snapshot(snapshot),
        thought.thought_type.as_str(),
        thought.thought_depth,
        thought.content
    );
    if !thought.context.ponder_notes.is_empty() {
        prompt.push_str("\nOpen questions from prior rounds:");
        for question in &thought.context.ponder_notes {
            let _ = write!(prompt, "\n- {}", question);
        }
    }
    prompt
}

pub fn action_selection_user_prompt(
    thought: &Thought,
    snapshot: &SystemSnapshot,
    ethical: &EthicalAssessment,
    common_sense: &CommonSenseAssessment,
    domain: &DomainAssessment,
    failure_context: Option<&str>,
) -> String {
    let mut prompt = thought_user_prompt(thought, snapshot);

    let _ = write!(
        prompt,
        "\n\nEthical evaluation: decision \"{}\"; {}",
        ethical.decision, ethical.alignment_check
    );
    let _ = write!(
        prompt,
        "\nCommon-sense evaluation: plausibility {:.2}; {}",
        common_sense.plausibility_score, common_sense.reasoning
    );
    let _ = write!(
        prompt,
        "\nDomain evaluation ({}): score {:.2}; {}",
        domain.domain, domain.score, domain.reasoning
    );
    if let Some(recommended) = &domain.recommended_action {
        let _ = write!(prompt, " (recommends: {})", recommended);
    }
    if let Some(failure) = failure_context {
        let _ = write!(
            prompt,
            "\n\nA previous selection was rejected by conscience review: {}\nChoose again taking this into account.",
            failure
        );
    }

    prompt
}

/// Profile accessors used by the pipeline
pub fn profile_domain(identity: &AgentIdentity) -> String {
    identity
        .core_profile
        .domain
        .clone()
        .unwrap_or_else(|| BASE_DOMAIN.to_string())
}

fn append_overrides(prompt: &mut String, overrides: &BTreeMap<String, String>) {
    if overrides.is_empty() {
        return;
    }
    prompt.push_str("\nProfile overrides:");
    for (key, value) in overrides {
        let _ = write!(prompt, "\n[{}] {}", key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::ThoughtType;
    use chrono::Utc;

    #[test]
    fn test_prompts_name_their_response_keys() {
        assert!(ethical_system_prompt().contains("alignment_check"));
        assert!(common_sense_system_prompt(&BTreeMap::new()).contains("plausibility_score"));
        assert!(domain_system_prompt("general", &BTreeMap::new()).contains("recommended_action"));
        assert!(
            action_selection_system_prompt(ActionType::all(), &BTreeMap::new())
                .contains("selected_action")
        );
    }

    #[test]
    fn test_action_selection_lists_only_permitted() {
        let prompt = action_selection_system_prompt(
            &[ActionType::Speak, ActionType::Defer],
            &BTreeMap::new(),
        );
        assert!(prompt.contains("Permitted actions: speak, defer."));
    }

    #[test]
    fn test_overrides_are_appended() {
        let overrides = BTreeMap::from([("tone".to_string(), "be terse".to_string())]);
        let prompt = common_sense_system_prompt(&overrides);
        assert!(prompt.contains("[tone] be terse"));
    }

    #[test]
    fn test_snapshot_formatting_includes_alerts() {
        let snapshot = SystemSnapshot {
            channel_id: Some("chan".into()),
            resource_alerts: vec!["🚨 CRITICAL! tokens".into()],
            ..SystemSnapshot::default()
        };
        let rendered = format_snapshot(&snapshot);
        assert!(rendered.contains("Channel: chan"));
        assert!(rendered.contains("🚨 CRITICAL!"));
    }

    #[test]
    fn test_ponder_notes_carried_into_prompt() {
        let mut thought = Thought::new("t", ThoughtType::Standard, "retry", 1, Utc::now());
        thought.context.ponder_notes = vec!["what channel?".into()];
        let prompt = thought_user_prompt(&thought, &SystemSnapshot::default());
        assert!(prompt.contains("what channel?"));
    }
}
