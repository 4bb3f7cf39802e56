//! # Docent Index
//!
//! Read-side vector index adapters. Both backends answer the same question
//! (top-k passages by similarity) through the `VectorIndex` trait:
//! - `sqlite`: exact search over an existing local SQLite file, opened read-only
//! - `qdrant`: approximate search over a Qdrant collection

pub mod qdrant;
pub mod sqlite;

use docent_core::config::{IndexBackend, IndexConfig};
use docent_core::error::Result;
use docent_core::traits::VectorIndex;

pub use qdrant::QdrantIndex;
pub use sqlite::SqliteIndex;

/// Open the configured index. `dimensions` is what the embedding model produces.
pub async fn open_index(config: &IndexConfig, dimensions: usize) -> Result<Box<dyn VectorIndex>> {
    match config.backend {
        IndexBackend::Sqlite => Ok(Box::new(SqliteIndex::open(
            &config.path,
            dimensions,
            config.metric,
        )?)),
        IndexBackend::Qdrant => Ok(Box::new(QdrantIndex::connect(config, dimensions).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_core::types::Metric;

    #[tokio::test]
    async fn test_open_sqlite_backend() {
        let path = std::env::temp_dir().join(format!("docent-open-{}.db", std::process::id()));
        let path_str = path.to_string_lossy().to_string();
        std::fs::remove_file(&path).ok();
        drop(SqliteIndex::create(&path_str, 8, Metric::Dot).unwrap());

        let config = IndexConfig {
            path: path_str,
            metric: Metric::Dot,
            ..IndexConfig::default()
        };
        let index = open_index(&config, 8).await.unwrap();
        assert_eq!(index.name(), "sqlite");
        assert_eq!(index.dimensions(), 8);
        assert_eq!(index.metric(), Metric::Dot);
        assert_eq!(index.count().await.unwrap(), 0);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_open_missing_sqlite_path_fails() {
        let path = std::env::temp_dir()
            .join(format!("docent-absent-{}", std::process::id()))
            .join("index.db");
        let config = IndexConfig {
            path: path.to_string_lossy().to_string(),
            ..IndexConfig::default()
        };
        let err = open_index(&config, 3).await.err().unwrap();
        assert!(err.is_configuration());
        assert!(!path.exists());
    }
}
