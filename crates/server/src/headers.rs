//! Schema header file applied at startup

use pim_sync_persistence::SchemaEvolver;
use serde_json::Value;
use std::path::Path;

use crate::ServerError;

/// Create or widen every table named in the header file; returns the number
/// of headers applied
pub async fn apply_header_file(evolver: &SchemaEvolver, path: &Path) -> Result<usize, ServerError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ServerError::Headers(format!("{}: {}", path.display(), e)))?;
    let document: Value = serde_json::from_str(&raw)
        .map_err(|e| ServerError::Headers(format!("{}: {}", path.display(), e)))?;

    let applied = evolver.create_tables_from_header_document(&document).await?;
    tracing::info!(path = %path.display(), applied, "Schema headers applied");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pim_sync_config::{ClusterSettings, SyncSettings};
    use pim_sync_persistence::{init_with_connector, InMemoryCluster};
    use std::io::Write;
    use std::sync::Arc;

    async fn evolver(cluster: &InMemoryCluster) -> SchemaEvolver {
        let settings = ClusterSettings {
            keyspace: "pim".to_string(),
            retry_count: 0,
            ..ClusterSettings::default()
        };
        init_with_connector(settings, SyncSettings::default(), Arc::new(cluster.clone()))
            .await
            .unwrap()
            .evolver
    }

    #[tokio::test]
    async fn test_header_file_creates_tables() {
        let cluster = InMemoryCluster::new();
        let evolver = evolver(&cluster).await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"item:Mamfile": {{"FileName": "text", "FileSize": "bigint"}}, "language:Language": {{}}}}"#
        )
        .unwrap();

        let applied = apply_header_file(&evolver, file.path()).await.unwrap();
        assert_eq!(applied, 2);
        assert!(cluster.columns("mamfile").unwrap().contains_key("FileSize"));
        assert!(cluster.has_table("language"));
    }

    #[tokio::test]
    async fn test_unreadable_header_file() {
        let cluster = InMemoryCluster::new();
        let evolver = evolver(&cluster).await;

        let missing = apply_header_file(&evolver, Path::new("/nonexistent/headers.json")).await;
        assert!(matches!(missing, Err(ServerError::Headers(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let invalid = apply_header_file(&evolver, file.path()).await;
        assert!(matches!(invalid, Err(ServerError::Headers(_))));
    }
}
