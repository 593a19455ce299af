//! User-profile enrichment for snapshots.
//!
//! User mentions are extracted from thought content (`<@123>` and
//! `ID: 123` forms, plus an explicit context user id), looked up as
//! `user/<id>` graph nodes, and expanded with nodes reachable within two
//! hops. An external profile provider, when configured, is merged first
//! and overridden by graph data.

use crate::error::Result;
use crate::memory::GraphMemory;
use crate::schemas::{GraphScope, Thought, UserProfile};
use crate::telemetry::TelemetryService;
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

/// External profile source (e.g. a directory service)
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn fetch_profile(&self, user_id: &str) -> Option<UserProfile>;
}

/// Extract user ids mentioned by a thought
pub fn extract_user_mentions(thought: &Thought) -> Vec<String> {
    let mention_re = Regex::new(r"<@(\d+)>").expect("static regex");
    let id_re = Regex::new(r"ID:\s*(\d+)").expect("static regex");

    let mut ids: BTreeSet<String> = BTreeSet::new();

    for caps in mention_re.captures_iter(&thought.content) {
        ids.insert(caps[1].to_string());
    }
    for caps in id_re.captures_iter(&thought.content) {
        ids.insert(caps[1].to_string());
    }
    if let Some(user_id) = &thought.context.user_id {
        ids.insert(user_id.clone());
    }

    ids.into_iter().collect()
}

pub(super) async fn enrich_user_profiles(
    memory: &GraphMemory,
    telemetry: &TelemetryService,
    provider: Option<&dyn ProfileProvider>,
    thought: &Thought,
) -> Result<Vec<UserProfile>> {
    let mut profiles = Vec::new();

    for user_id in extract_user_mentions(thought) {
        // Provider data first; graph data overrides it below
        let mut profile = match provider {
            Some(p) => p
                .fetch_profile(&user_id)
                .await
                .unwrap_or_else(|| UserProfile::new(&user_id)),
            None => UserProfile::new(&user_id),
        };
        profile.user_id = user_id.clone();

        let node_id = format!("user/{}", user_id);
        if let Some(node) = memory.recall(&node_id, GraphScope::Local).await? {
            if let Some(name) = node.attr_text("name") {
                profile.display_name = Some(name.to_string());
            }
            for (key, value) in &node.attributes {
                profile.attributes.insert(key.clone(), value.clone());
            }

            let connected = memory.traverse(&node_id, GraphScope::Local, 2).await?;
            profile.connected_nodes = connected.into_iter().map(|n| n.node_id).collect();
        } else {
            debug!(user_id = %user_id, "No graph node for mentioned user");
        }

        // Cross-channel message samples from recent observe correlations
        let recent = telemetry.recent_for_action("observe", 20).await?;
        profile.recent_messages = recent
            .iter()
            .filter_map(|c| c.request_data.as_ref())
            .filter(|data| data.get("author_id").and_then(|v| v.as_str()) == Some(&user_id))
            .filter_map(|data| data.get("content").and_then(|v| v.as_str()))
            .take(5)
            .map(str::to_string)
            .collect();

        profiles.push(profile);
    }

    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{Database, MigrationSet};
    use crate::schemas::{GraphEdge, GraphNode, NodeType, Relationship, ThoughtType};
    use chrono::Utc;
    use std::sync::Arc;

    fn thought_with(content: &str) -> Thought {
        Thought::new("task-1", ThoughtType::Seed, content, 0, Utc::now())
    }

    #[test]
    fn test_extract_mention_forms() {
        let ids = extract_user_mentions(&thought_with("ping <@42> and also ID: 77 please"));
        assert_eq!(ids, vec!["42".to_string(), "77".to_string()]);
    }

    #[test]
    fn test_extract_context_user_id() {
        let mut thought = thought_with("no inline mentions");
        thought.context.user_id = Some("9".to_string());
        assert_eq!(extract_user_mentions(&thought), vec!["9".to_string()]);
    }

    #[test]
    fn test_duplicate_mentions_deduplicated() {
        let ids = extract_user_mentions(&thought_with("<@5> again <@5> and ID: 5"));
        assert_eq!(ids, vec!["5".to_string()]);
    }

    struct StaticProvider;

    #[async_trait]
    impl ProfileProvider for StaticProvider {
        async fn fetch_profile(&self, user_id: &str) -> Option<UserProfile> {
            let mut profile = UserProfile::new(user_id);
            profile.display_name = Some("From Provider".to_string());
            profile
                .attributes
                .insert("origin".to_string(), "provider".into());
            Some(profile)
        }
    }

    #[tokio::test]
    async fn test_graph_data_overrides_provider() {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let memory = GraphMemory::new(db.clone());
        let telemetry = TelemetryService::new(db, Arc::new(FixedClock::default_start()));

        memory
            .memorize(
                &GraphNode::new("user/42", NodeType::User, GraphScope::Local, Utc::now())
                    .with_attr("name", "Graph Name"),
            )
            .await
            .unwrap();
        memory
            .memorize(&GraphNode::new(
                "channel/dev",
                NodeType::Channel,
                GraphScope::Local,
                Utc::now(),
            ))
            .await
            .unwrap();
        memory
            .add_edge(&GraphEdge {
                source: "user/42".into(),
                target: "channel/dev".into(),
                relationship: Relationship::RelatesTo,
                scope: GraphScope::Local,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let profiles = enrich_user_profiles(
            &memory,
            &telemetry,
            Some(&StaticProvider),
            &thought_with("hello <@42>"),
        )
        .await
        .unwrap();

        assert_eq!(profiles.len(), 1);
        // Graph name wins over the provider's
        assert_eq!(profiles[0].display_name.as_deref(), Some("Graph Name"));
        // Provider attributes survive where the graph is silent
        assert_eq!(
            profiles[0].attributes.get("origin").and_then(|v| v.as_text()),
            Some("provider")
        );
        assert!(profiles[0]
            .connected_nodes
            .contains(&"channel/dev".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_user_still_produces_profile() {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let memory = GraphMemory::new(db.clone());
        let telemetry = TelemetryService::new(db, Arc::new(FixedClock::default_start()));

        let profiles =
            enrich_user_profiles(&memory, &telemetry, None, &thought_with("hi ID: 404")).await.unwrap();

        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].user_id, "404");
        assert!(profiles[0].display_name.is_none());
    }
}
