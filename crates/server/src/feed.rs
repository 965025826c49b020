//! Change-feed loop
//!
//! One JSON change event per line. Upserts go to the schema evolver as
//! records, deletes by key. A line that fails to parse or to apply is logged
//! and counted; the loop carries on with the next one.

use pim_sync_core::{ChangeEvent, ChangeOp};
use pim_sync_persistence::SchemaEvolver;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::ServerError;

/// Outcome counts of one feed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub applied: u64,
    pub failed: u64,
    /// Lines that were not a valid change event
    pub rejected: u64,
}

/// Apply one change event; `true` on success
pub async fn apply_event(evolver: &SchemaEvolver, event: ChangeEvent) -> bool {
    match event.op {
        ChangeOp::Upsert => evolver.write_record(&event.into_record()).await,
        ChangeOp::Delete => evolver.delete_row(event.kind, &event.entity, &event.keys).await,
    }
}

/// Read events from `reader` until end of input
pub async fn run_feed<R>(evolver: &SchemaEvolver, reader: R) -> Result<FeedStats, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = FeedStats::default();
    let mut line_no = 0u64;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| ServerError::Feed(e.to_string()))?
    {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        metrics::counter!("pim_sync_events_total").increment(1);

        let event = match ChangeEvent::from_json(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping malformed change event");
                metrics::counter!("pim_sync_event_failures_total").increment(1);
                stats.rejected += 1;
                continue;
            },
        };

        let (kind, entity, op) = (event.kind, event.entity.clone(), event.op);
        if apply_event(evolver, event).await {
            stats.applied += 1;
            tracing::debug!(line = line_no, kind = %kind, entity = %entity, op = ?op, "Change applied");
        } else {
            stats.failed += 1;
            metrics::counter!("pim_sync_event_failures_total").increment(1);
            tracing::warn!(line = line_no, kind = %kind, entity = %entity, op = ?op, "Change not applied");
        }
    }

    tracing::info!(
        applied = stats.applied,
        failed = stats.failed,
        rejected = stats.rejected,
        "Change feed drained"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pim_sync_config::{ClusterSettings, SyncSettings};
    use pim_sync_persistence::{init_with_connector, BoundValue, InMemoryCluster};
    use std::sync::Arc;

    async fn evolver(cluster: &InMemoryCluster) -> SchemaEvolver {
        let settings = ClusterSettings {
            keyspace: "pim".to_string(),
            retry_count: 0,
            retry_delay_ms: 5,
            ..ClusterSettings::default()
        };
        init_with_connector(settings, SyncSettings::default(), Arc::new(cluster.clone()))
            .await
            .unwrap()
            .evolver
    }

    #[tokio::test]
    async fn test_feed_applies_upserts_and_deletes() {
        let cluster = InMemoryCluster::new();
        let evolver = evolver(&cluster).await;

        let input = concat!(
            r#"{"kind":"language","entity":"Language","keys":{"ID":1},"languages":{"0":{"ShortName":"de"}}}"#,
            "\n",
            r#"{"kind":"item","entity":"Pdmarticle","keys":{"ID":7},"languages":{"1":{"Label":"Bolt"}}}"#,
            "\n\n",
            r#"{"kind":"item","entity":"Pdmarticle","keys":{"ID":8},"languages":{"1":{"Label":"Nut"}}}"#,
            "\n",
            r#"{"op":"delete","kind":"item","entity":"Pdmarticle","keys":{"ID":8,"LanguageID":1}}"#,
            "\n",
        );

        let stats = run_feed(&evolver, input.as_bytes()).await.unwrap();
        assert_eq!(
            stats,
            FeedStats {
                applied: 4,
                failed: 0,
                rejected: 0
            }
        );
        let rows = cluster.rows("pdmarticle");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Label"), Some(&BoundValue::from("Bolt")));
    }

    #[tokio::test]
    async fn test_bad_lines_do_not_stop_the_feed() {
        let cluster = InMemoryCluster::new();
        let evolver = evolver(&cluster).await;

        let input = concat!(
            "not json\n",
            r#"{"kind":"workflow","entity":"Pdmarticle"}"#,
            "\n",
            r#"{"kind":"mapping","entity":"Pdmarticle","keys":{"ClassID":1}}"#,
            "\n",
            r#"{"kind":"mapping","entity":"Pdmarticle","keys":{"ClassID":1,"AttributeID":2}}"#,
            "\n",
        );

        let stats = run_feed(&evolver, input.as_bytes()).await.unwrap();
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.applied, 1);
        assert_eq!(cluster.rows("pdmarticle_mapping").len(), 1);
    }
}
