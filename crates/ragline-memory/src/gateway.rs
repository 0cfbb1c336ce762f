use std::collections::HashMap;
use std::sync::Arc;

use ragline_core::{
    CollectionStats, Distance, IndexedPoint, RagError, RagResult, StoredPoint,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::store::{FieldCondition, Filter, PayloadIndex, VectorStore};

/// Payload fields indexed on every new collection.
pub const PAYLOAD_INDEXES: &[(&str, PayloadIndex)] = &[
    ("article_id", PayloadIndex::Keyword),
    ("title", PayloadIndex::Text),
    ("content", PayloadIndex::Text),
];

/// Owns collection lifecycle and point writes against a [`VectorStore`].
///
/// The gateway remembers each collection's vector size once it has created
/// or inspected it, and rejects mismatched vectors before they are sent.
pub struct CollectionGateway {
    store: Arc<dyn VectorStore>,
    vector_sizes: RwLock<HashMap<String, usize>>,
}

impl CollectionGateway {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            vector_sizes: RwLock::new(HashMap::new()),
        }
    }

    /// The underlying store, for read paths.
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Ensures `name` exists with the payload indexes searches rely on.
    ///
    /// With `recreate`, the collection is deleted first and deletion errors
    /// are ignored. An existing collection is reused as-is; any other
    /// creation failure is returned.
    pub async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
        recreate: bool,
    ) -> RagResult<()> {
        if vector_size == 0 {
            return Err(RagError::Config("vector size must be at least 1".into()));
        }

        if recreate {
            match self.store.delete_collection(name).await {
                Ok(()) => info!(collection = name, "Deleted existing collection"),
                Err(e) => debug!(collection = name, error = %e, "Delete before recreate failed"),
            }
            self.vector_sizes.write().await.remove(name);
        }

        match self.store.create_collection(name, vector_size, distance).await {
            Ok(()) => {
                for (field, index) in PAYLOAD_INDEXES {
                    self.store.create_payload_index(name, field, *index).await?;
                }
                info!(collection = name, vector_size, "Created collection");
                self.vector_sizes
                    .write()
                    .await
                    .insert(name.to_string(), vector_size);
                Ok(())
            }
            Err(e) if e.to_string().to_lowercase().contains("already exists") => {
                info!(collection = name, "Collection already exists, continuing");
                let existing = self.vector_size(name).await?;
                if existing != vector_size {
                    warn!(
                        collection = name,
                        existing,
                        requested = vector_size,
                        "Existing collection has a different vector size"
                    );
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Fixed vector size of `name`, cached after the first lookup.
    pub async fn vector_size(&self, name: &str) -> RagResult<usize> {
        if let Some(size) = self.vector_sizes.read().await.get(name) {
            return Ok(*size);
        }
        let info = self.store.collection_info(name).await?;
        self.vector_sizes
            .write()
            .await
            .insert(name.to_string(), info.vector_size);
        Ok(info.vector_size)
    }

    /// Checks every point against the collection's vector size.
    pub async fn check_dimensions(&self, name: &str, points: &[IndexedPoint]) -> RagResult<()> {
        let expected = self.vector_size(name).await?;
        match points.iter().find(|p| p.vector.len() != expected) {
            Some(bad) => Err(RagError::DimensionMismatch {
                expected,
                actual: bad.vector.len(),
            }),
            None => Ok(()),
        }
    }

    /// Writes `points` in one all-or-nothing call and returns how many were
    /// written. Mismatched vectors are rejected before reaching the store.
    pub async fn upsert(&self, name: &str, points: Vec<IndexedPoint>) -> RagResult<usize> {
        if points.is_empty() {
            return Ok(0);
        }
        self.check_dimensions(name, &points).await?;
        let count = points.len();
        self.store.upsert(name, points).await?;
        debug!(collection = name, count, "Upserted points");
        Ok(count)
    }

    /// Point and vector counts plus status.
    pub async fn get_stats(&self, name: &str) -> RagResult<CollectionStats> {
        let info = self.store.collection_info(name).await?;
        Ok(CollectionStats {
            points_count: info.points_count,
            vectors_count: info.vectors_count.unwrap_or(info.points_count),
            status: info.status,
        })
    }

    /// Up to `limit` points whose payload `field` equals `value`.
    pub async fn get_by_field(
        &self,
        name: &str,
        field: &str,
        value: serde_json::Value,
        limit: usize,
    ) -> RagResult<Vec<StoredPoint>> {
        let filter = Filter::must(FieldCondition::match_value(field, value));
        self.store.scroll(name, Some(&filter), limit).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryVectorStore;
    use ragline_core::{ArticleId, ChunkPayload};

    fn point(id: u64, dim: usize) -> IndexedPoint {
        IndexedPoint {
            id,
            vector: vec![0.5; dim],
            payload: ChunkPayload {
                article_id: ArticleId::Int(1),
                chunk_index: id as usize,
                title: "T".into(),
                content: "c".into(),
                text: "# T\n\nc".into(),
                source: "unknown".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let gw = CollectionGateway::new(Arc::new(InMemoryVectorStore::new()));
        gw.create_collection("docs", 4, Distance::Cosine, false).await.unwrap();
        gw.upsert("docs", vec![point(1, 4)]).await.unwrap();

        gw.create_collection("docs", 4, Distance::Cosine, false).await.unwrap();
        assert_eq!(gw.get_stats("docs").await.unwrap().points_count, 1);
    }

    #[tokio::test]
    async fn test_recreate_discards_points() {
        let gw = CollectionGateway::new(Arc::new(InMemoryVectorStore::new()));
        gw.create_collection("docs", 4, Distance::Cosine, true).await.unwrap();
        gw.upsert("docs", vec![point(1, 4), point(2, 4)]).await.unwrap();

        gw.create_collection("docs", 8, Distance::Cosine, true).await.unwrap();
        let stats = gw.get_stats("docs").await.unwrap();
        assert_eq!(stats.points_count, 0);
        assert_eq!(stats.status, "green");
        assert_eq!(gw.vector_size("docs").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_dimension_guard_runs_before_store() {
        let gw = CollectionGateway::new(Arc::new(InMemoryVectorStore::new()));
        gw.create_collection("docs", 4, Distance::Cosine, false).await.unwrap();
        let err = gw
            .upsert("docs", vec![point(1, 4), point(2, 3)])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 4, actual: 3 }));
        assert_eq!(gw.get_stats("docs").await.unwrap().points_count, 0);
    }

    #[tokio::test]
    async fn test_get_by_field() {
        let gw = CollectionGateway::new(Arc::new(InMemoryVectorStore::new()));
        gw.create_collection("docs", 2, Distance::Cosine, false).await.unwrap();
        gw.upsert("docs", vec![point(1, 2), point(2, 2)]).await.unwrap();

        let found = gw
            .get_by_field("docs", "article_id", serde_json::json!(1), 100)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        let none = gw
            .get_by_field("docs", "article_id", serde_json::json!("1"), 100)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_zero_vector_size_is_config_error() {
        let gw = CollectionGateway::new(Arc::new(InMemoryVectorStore::new()));
        assert!(matches!(
            gw.create_collection("docs", 0, Distance::Cosine, false).await,
            Err(RagError::Config(_))
        ));
    }
}
