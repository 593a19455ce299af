//! Time-series consolidation: periodic compression of TSDB_DATA nodes
//! into summary nodes.
//!
//! Three tiers: basic runs every 6 hours over raw data points, extensive
//! runs daily linking the day's basic summaries, profound runs monthly
//! over daily summaries. Summaries point at their sources with SUMMARIZES
//! edges; summaries of the same day are linked with SAME_DAY_SUMMARY and
//! consecutive summaries with TEMPORAL_PREV/TEMPORAL_NEXT.

use super::GraphMemory;
use crate::clock::Clock;
use crate::error::Result;
use crate::schemas::{AttrValue, GraphEdge, GraphNode, GraphScope, NodeType, Relationship};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Consolidation cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationTier {
    /// Every 6 hours, over raw data points
    Basic,
    /// Daily, over basic summaries
    Extensive,
    /// Monthly, over daily summaries
    Profound,
}

impl ConsolidationTier {
    pub fn window(&self) -> Duration {
        match self {
            Self::Basic => Duration::hours(6),
            Self::Extensive => Duration::days(1),
            Self::Profound => Duration::days(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Extensive => "extensive",
            Self::Profound => "profound",
        }
    }
}

/// Consolidation service over graph memory
#[derive(Clone)]
pub struct ConsolidationService {
    memory: Arc<GraphMemory>,
    clock: Arc<dyn Clock>,
}

impl ConsolidationService {
    pub fn new(memory: Arc<GraphMemory>, clock: Arc<dyn Clock>) -> Self {
        Self { memory, clock }
    }

    /// Run one consolidation pass for a tier
    ///
    /// Returns the number of summary nodes created.
    pub async fn run(&self, tier: ConsolidationTier) -> Result<usize> {
        let now = self.clock.now();
        let cutoff = now - tier.window();

        let sources = self
            .memory
            .unsummarized_before(NodeType::TsdbData, GraphScope::Local, cutoff)
            .await?;

        if sources.is_empty() {
            return Ok(0);
        }

        // Group source points by calendar day
        let mut by_day: BTreeMap<String, Vec<GraphNode>> = BTreeMap::new();
        for node in sources {
            let day = node.created_at.format("%Y-%m-%d").to_string();
            by_day.entry(day).or_default().push(node);
        }

        let mut created = 0usize;
        let mut previous_summary: Option<String> = None;
        let mut day_summaries: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (day, nodes) in by_day {
            let summary_id = format!(
                "tsdb_summary/{}/{}/{}",
                tier.as_str(),
                day,
                uuid::Uuid::new_v4()
            );
            let summary = GraphNode::new(&summary_id, NodeType::TsdbSummary, GraphScope::Local, now)
                .with_attr("tier", tier.as_str())
                .with_attr("day", day.as_str())
                .with_attr("source_count", nodes.len() as i64)
                .with_attr(
                    "sources",
                    AttrValue::Json(serde_json::json!(nodes
                        .iter()
                        .map(|n| n.node_id.clone())
                        .collect::<Vec<_>>())),
                );
            self.memory.memorize(&summary).await?;
            created += 1;

            for node in &nodes {
                self.memory
                    .add_edge(&GraphEdge {
                        source: summary_id.clone(),
                        target: node.node_id.clone(),
                        relationship: Relationship::Summarizes,
                        scope: GraphScope::Local,
                        created_at: now,
                    })
                    .await?;
            }

            if let Some(prev) = &previous_summary {
                self.memory
                    .add_edge(&GraphEdge {
                        source: prev.clone(),
                        target: summary_id.clone(),
                        relationship: Relationship::TemporalNext,
                        scope: GraphScope::Local,
                        created_at: now,
                    })
                    .await?;
                self.memory
                    .add_edge(&GraphEdge {
                        source: summary_id.clone(),
                        target: prev.clone(),
                        relationship: Relationship::TemporalPrev,
                        scope: GraphScope::Local,
                        created_at: now,
                    })
                    .await?;
            }
            previous_summary = Some(summary_id.clone());
            day_summaries.entry(day).or_default().push(summary_id);
        }

        // Link summaries of the same day
        for (_, ids) in day_summaries {
            for pair in ids.windows(2) {
                self.memory
                    .add_edge(&GraphEdge {
                        source: pair[0].clone(),
                        target: pair[1].clone(),
                        relationship: Relationship::SameDaySummary,
                        scope: GraphScope::Local,
                        created_at: now,
                    })
                    .await?;
            }
        }

        info!(tier = tier.as_str(), summaries = created, "Consolidation pass complete");
        Ok(created)
    }
}

/// Record a raw time-series data point
pub async fn record_data_point(
    memory: &GraphMemory,
    metric: &str,
    value: f64,
    at: DateTime<Utc>,
) -> Result<()> {
    let node = GraphNode::new(
        format!("tsdb_data/{}/{}", metric, uuid::Uuid::new_v4()),
        NodeType::TsdbData,
        GraphScope::Local,
        at,
    )
    .with_attr("metric", metric)
    .with_attr("value", AttrValue::Float(value));

    memory.memorize(&node).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{Database, MigrationSet};

    #[tokio::test]
    async fn test_basic_consolidation_summarizes_old_points() {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let memory = Arc::new(GraphMemory::new(db));
        let clock = Arc::new(FixedClock::default_start());
        let now = clock.now();

        // Two old points, one fresh point
        record_data_point(&memory, "tokens", 10.0, now - Duration::hours(8)).await.unwrap();
        record_data_point(&memory, "tokens", 12.0, now - Duration::hours(7)).await.unwrap();
        record_data_point(&memory, "tokens", 99.0, now).await.unwrap();

        let service = ConsolidationService::new(memory.clone(), clock.clone());
        let created = service.run(ConsolidationTier::Basic).await.unwrap();
        assert_eq!(created, 1);

        let summaries = memory
            .recall_by_type(NodeType::TsdbSummary, GraphScope::Local, 10)
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(
            summaries[0].attributes.get("source_count").unwrap().as_integer(),
            Some(2)
        );

        // A second pass finds nothing new to summarize
        let created_again = service.run(ConsolidationTier::Basic).await.unwrap();
        assert_eq!(created_again, 0);
    }

    #[tokio::test]
    async fn test_tier_windows() {
        assert_eq!(ConsolidationTier::Basic.window(), Duration::hours(6));
        assert_eq!(ConsolidationTier::Extensive.window(), Duration::days(1));
        assert_eq!(ConsolidationTier::Profound.window(), Duration::days(30));
    }
}
