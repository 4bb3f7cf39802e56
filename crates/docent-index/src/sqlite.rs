//! SQLite vector index with exact nearest-neighbour search.
//!
//! Passages live in a single table; embeddings are stored as little-endian
//! `f32` blobs. A small `index_meta` table records the dimensionality and
//! metric the collection was populated with, so a mismatched embedding model
//! is caught when the index is opened instead of producing nonsense scores.

use async_trait::async_trait;
use docent_core::error::{DocentError, Result};
use docent_core::traits::VectorIndex;
use docent_core::types::{EmbeddingVector, Metadata, Metric, PassageRecord, ScoredPassage};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

fn db_err(e: rusqlite::Error) -> DocentError {
    DocentError::IndexUnavailable(e.to_string())
}

fn open_read_only(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(db_err)
}

/// Where connections come from.
#[derive(Clone)]
enum Backing {
    /// Populated file opened read-only; every blocking task gets its own
    /// connection so concurrent searches do not queue.
    File(PathBuf),
    /// Writable connection owned by the index (fixtures, in-memory).
    Owned(Arc<Mutex<Connection>>),
}

impl Backing {
    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match self {
            Backing::File(path) => f(&open_read_only(path)?),
            Backing::Owned(conn) => {
                let conn = conn
                    .lock()
                    .map_err(|e| DocentError::IndexUnavailable(e.to_string()))?;
                f(&conn)
            }
        }
    }
}

pub struct SqliteIndex {
    backing: Backing,
    dimensions: usize,
    metric: Metric,
}

impl SqliteIndex {
    /// Open an existing, populated index file read-only. `~` is expanded.
    ///
    /// A missing file, or one without `index_meta`, is a configuration error:
    /// nothing is created on disk.
    pub fn open(path: &str, dimensions: usize, metric: Metric) -> Result<Self> {
        let db_path = PathBuf::from(shellexpand::tilde(path).into_owned());
        if !db_path.is_file() {
            return Err(DocentError::Config(format!(
                "index file {} does not exist",
                db_path.display()
            )));
        }

        let conn = open_read_only(&db_path)?;
        let stored = read_meta(&conn)
            .map_err(|e| {
                DocentError::Config(format!("{} is not a docent index: {e}", db_path.display()))
            })?
            .ok_or_else(|| {
                DocentError::Config(format!(
                    "index {} has no dimensions/metric recorded",
                    db_path.display()
                ))
            })?;
        check_meta(stored, dimensions, metric)?;
        tracing::debug!("Opened SQLite index at {} (read-only)", db_path.display());

        Ok(Self {
            backing: Backing::File(db_path),
            dimensions,
            metric,
        })
    }

    /// Create an index file (or reopen one for writing) and record its
    /// dimensions and metric. For fixtures and small local collections.
    pub fn create(path: &str, dimensions: usize, metric: Metric) -> Result<Self> {
        let expanded = shellexpand::tilde(path).to_string();
        let db_path = Path::new(&expanded);
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(db_err)?;
        tracing::info!("🗂️ Created SQLite index at {}", db_path.display());
        Self::init(conn, dimensions, metric)
    }

    /// Fresh in-memory index, used by tests and fixtures.
    pub fn open_in_memory(dimensions: usize, metric: Metric) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn, dimensions, metric)
    }

    fn init(conn: Connection, dimensions: usize, metric: Metric) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS passages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(db_err)?;

        match read_meta(&conn)? {
            Some(stored) => check_meta(stored, dimensions, metric)?,
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('dimensions', ?1), ('metric', ?2)",
                    rusqlite::params![dimensions.to_string(), metric.as_str()],
                )
                .map_err(db_err)?;
            }
        }

        Ok(Self {
            backing: Backing::Owned(Arc::new(Mutex::new(conn))),
            dimensions,
            metric,
        })
    }

    /// Store one passage. Ingestion is normally done by a separate tool;
    /// this exists for fixtures and small local collections.
    pub fn insert(&self, record: &PassageRecord) -> Result<()> {
        let Backing::Owned(conn) = &self.backing else {
            return Err(DocentError::Config("index was opened read-only".into()));
        };
        record.vector.ensure_dimensions(self.dimensions)?;
        let metadata = serde_json::to_string(&record.metadata)?;
        let conn = conn
            .lock()
            .map_err(|e| DocentError::IndexUnavailable(e.to_string()))?;
        conn.execute(
            "INSERT INTO passages (text, metadata, embedding) VALUES (?1, ?2, ?3)",
            rusqlite::params![record.text, metadata, encode(record.vector.as_slice())],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn insert_all<'a>(&self, records: impl IntoIterator<Item = &'a PassageRecord>) -> Result<usize> {
        let mut n = 0;
        for record in records {
            self.insert(record)?;
            n += 1;
        }
        Ok(n)
    }
}

/// Stored dimensions and metric, if the index has been initialised.
fn read_meta(conn: &Connection) -> Result<Option<(usize, Metric)>> {
    let (Some(dims), Some(metric)) = (meta_value(conn, "dimensions")?, meta_value(conn, "metric")?)
    else {
        return Ok(None);
    };
    let dims: usize = dims
        .parse()
        .map_err(|_| DocentError::Config(format!("corrupt index_meta dimensions '{dims}'")))?;
    Ok(Some((dims, metric.parse()?)))
}

fn check_meta(stored: (usize, Metric), dimensions: usize, metric: Metric) -> Result<()> {
    let (stored_dims, stored_metric) = stored;
    if stored_dims != dimensions {
        return Err(DocentError::DimensionMismatch {
            expected: stored_dims,
            actual: dimensions,
        });
    }
    if stored_metric != metric {
        return Err(DocentError::Config(format!(
            "index was built with metric '{stored_metric}', configured '{metric}'"
        )));
    }
    Ok(())
}

fn meta_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM index_meta WHERE key = ?1",
        rusqlite::params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(db_err)
}

fn encode(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Score every stored passage against `query` and keep the best `k`.
fn scan(conn: &Connection, query: &[f32], k: usize, metric: Metric) -> Result<Vec<ScoredPassage>> {
    let mut stmt = conn
        .prepare("SELECT text, metadata, embedding FROM passages")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })
        .map_err(db_err)?;

    let mut hits = Vec::new();
    for row in rows {
        let (text, metadata, blob) = row.map_err(db_err)?;
        let vector = decode(&blob);
        if vector.len() != query.len() {
            tracing::warn!("Skipping passage with {} dimensions", vector.len());
            continue;
        }
        let score = metric.score(query, &vector);
        if !score.is_finite() {
            continue;
        }
        let metadata: Metadata = serde_json::from_str(&metadata).unwrap_or_default();
        hits.push(ScoredPassage {
            text,
            score,
            metadata,
        });
    }

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);
    Ok(hits)
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    async fn search(&self, vector: &EmbeddingVector, k: usize) -> Result<Vec<ScoredPassage>> {
        vector.ensure_dimensions(self.dimensions)?;
        if k == 0 {
            return Ok(vec![]);
        }
        let backing = self.backing.clone();
        let query = vector.as_slice().to_vec();
        let metric = self.metric;

        tokio::task::spawn_blocking(move || {
            backing.with_connection(|conn| scan(conn, &query, k, metric))
        })
        .await
        .map_err(|e| DocentError::IndexUnavailable(format!("search task failed: {e}")))?
    }

    async fn count(&self) -> Result<usize> {
        let backing = self.backing.clone();
        tokio::task::spawn_blocking(move || {
            backing.with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM passages", [], |r| r.get::<_, i64>(0))
                    .map(|n| n as usize)
                    .map_err(db_err)
            })
        })
        .await
        .map_err(|e| DocentError::IndexUnavailable(format!("count task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_core::types::MetadataValue;

    fn index_with(records: &[(Vec<f32>, &str)]) -> SqliteIndex {
        let index = SqliteIndex::open_in_memory(3, Metric::Cosine).unwrap();
        for (v, text) in records {
            index.insert(&PassageRecord::new(v.clone(), *text)).unwrap();
        }
        index
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let index = index_with(&[
            (vec![0.0, 1.0, 0.0], "far"),
            (vec![1.0, 0.0, 0.0], "exact"),
            (vec![0.9, 0.1, 0.0], "close"),
        ]);
        let hits = index
            .search(&EmbeddingVector::new(vec![1.0, 0.0, 0.0]), 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "exact");
        assert_eq!(hits[1].text, "close");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_fewer_than_k() {
        let index = index_with(&[(vec![1.0, 0.0, 0.0], "only")]);
        let hits = index
            .search(&EmbeddingVector::new(vec![1.0, 0.0, 0.0]), 4)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_index() {
        let index = index_with(&[]);
        let hits = index
            .search(&EmbeddingVector::new(vec![1.0, 0.0, 0.0]), 4)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_query_dimensions() {
        let index = index_with(&[]);
        let err = index
            .search(&EmbeddingVector::new(vec![1.0, 0.0]), 4)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let index = SqliteIndex::open_in_memory(2, Metric::Dot).unwrap();
        let record = PassageRecord::new(vec![1.0, 1.0], "Lakers won in 2020")
            .with_metadata("source", MetadataValue::Text("nba.txt".into()));
        index.insert(&record).unwrap();
        let hits = index
            .search(&EmbeddingVector::new(vec![1.0, 2.0]), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].score, 3.0);
        assert_eq!(
            hits[0].metadata.get("source"),
            Some(&MetadataValue::Text("nba.txt".into()))
        );
    }

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("docent-index-{tag}-{}.db", std::process::id()))
    }

    #[test]
    fn test_reopen_with_other_dimensions_fails() {
        let path = temp_path("reopen");
        let path = path.to_string_lossy().to_string();
        std::fs::remove_file(&path).ok();

        drop(SqliteIndex::create(&path, 3, Metric::Cosine).unwrap());
        assert!(SqliteIndex::open(&path, 3, Metric::Cosine).is_ok());
        assert!(matches!(
            SqliteIndex::open(&path, 4, Metric::Cosine),
            Err(DocentError::DimensionMismatch { expected: 3, actual: 4 })
        ));
        assert!(SqliteIndex::open(&path, 3, Metric::Dot).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_open_missing_file_creates_nothing() {
        let dir = std::env::temp_dir().join(format!("docent-missing-{}", std::process::id()));
        let path = dir.join("typo.db");
        let err = SqliteIndex::open(&path.to_string_lossy(), 3, Metric::Cosine)
            .err()
            .unwrap();
        assert!(err.is_configuration());
        assert!(!path.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_open_without_meta_is_config_error() {
        let path = temp_path("nometa");
        std::fs::remove_file(&path).ok();
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE unrelated (x INTEGER);")
            .unwrap();

        let err = SqliteIndex::open(&path.to_string_lossy(), 3, Metric::Cosine)
            .err()
            .unwrap();
        assert!(err.is_configuration());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_opened_index_rejects_insert() {
        let path = temp_path("readonly");
        let path = path.to_string_lossy().to_string();
        std::fs::remove_file(&path).ok();
        drop(SqliteIndex::create(&path, 3, Metric::Cosine).unwrap());

        let index = SqliteIndex::open(&path, 3, Metric::Cosine).unwrap();
        let err = index
            .insert(&PassageRecord::new(vec![1.0, 0.0, 0.0], "nope"))
            .unwrap_err();
        assert!(err.is_configuration());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_searches_on_file_index() {
        let path = temp_path("concurrent");
        let path = path.to_string_lossy().to_string();
        std::fs::remove_file(&path).ok();
        {
            let writer = SqliteIndex::create(&path, 3, Metric::Cosine).unwrap();
            for i in 0..200 {
                let v = vec![1.0, i as f32 / 200.0, 0.0];
                writer.insert(&PassageRecord::new(v, format!("p{i}"))).unwrap();
            }
            writer
                .insert(&PassageRecord::new(vec![1.0, 0.0, 0.0], "best"))
                .unwrap();
        }

        let index = Arc::new(SqliteIndex::open(&path, 3, Metric::Cosine).unwrap());
        let searches: Vec<_> = (0..8)
            .map(|_| {
                let index = index.clone();
                tokio::spawn(async move {
                    index
                        .search(&EmbeddingVector::new(vec![1.0, 0.0, 0.0]), 2)
                        .await
                })
            })
            .collect();
        for search in searches {
            let hits = search.await.unwrap().unwrap();
            assert_eq!(hits.len(), 2);
            assert!((hits[0].score - 1.0).abs() < 1e-6);
        }
        assert_eq!(index.count().await.unwrap(), 201);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_blob_encoding() {
        let values = [0.5f32, -1.25, 3.0];
        assert_eq!(decode(&encode(&values)), values);
    }
}
