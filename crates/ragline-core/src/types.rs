use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RagError;

// --- Documents ---

/// Identifier of a source document.
///
/// Ingested corpora mix integer and string ids, and the vector store matches
/// them type-sensitively, so both shapes are kept as they arrive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArticleId {
    /// Numeric id, e.g. a database primary key.
    Int(i64),
    /// Opaque string id.
    Text(String),
}

impl ArticleId {
    /// True for a string id that is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        match self {
            ArticleId::Int(_) => false,
            ArticleId::Text(s) => s.trim().is_empty(),
        }
    }

    /// The same id in the other representation, if one exists.
    ///
    /// `Text("42")` becomes `Int(42)` and `Int(42)` becomes `Text("42")`;
    /// a non-numeric string has no alternate.
    pub fn alternate(&self) -> Option<ArticleId> {
        match self {
            ArticleId::Int(n) => Some(ArticleId::Text(n.to_string())),
            ArticleId::Text(s) => s.trim().parse::<i64>().ok().map(ArticleId::Int),
        }
    }

    /// JSON value used when filtering on the `article_id` payload field.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ArticleId::Int(n) => serde_json::Value::from(*n),
            ArticleId::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArticleId::Int(n) => write!(f, "{n}"),
            ArticleId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ArticleId {
    fn from(value: i64) -> Self {
        ArticleId::Int(value)
    }
}

impl From<&str> for ArticleId {
    fn from(value: &str) -> Self {
        ArticleId::Text(value.to_string())
    }
}

impl From<String> for ArticleId {
    fn from(value: String) -> Self {
        ArticleId::Text(value)
    }
}

/// A source record handed to the indexing pipeline. Read-only to the core.
///
/// Input records may carry the id as `id`, `article_id` or both; a non-blank
/// `article_id` takes precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "DocumentRecord")]
pub struct Document {
    /// Stable identifier; documents without one are skipped at indexing time.
    pub id: Option<ArticleId>,
    /// Title, possibly empty.
    #[serde(default)]
    pub title: String,
    /// Body text to chunk and embed.
    #[serde(default)]
    pub content: String,
    /// Where the document came from.
    #[serde(default)]
    pub source: Option<String>,
    /// Free-form grouping label.
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Deserialize)]
struct DocumentRecord {
    #[serde(default)]
    id: Option<ArticleId>,
    #[serde(default)]
    article_id: Option<ArticleId>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

impl From<DocumentRecord> for Document {
    fn from(record: DocumentRecord) -> Self {
        Self {
            id: record.article_id.filter(|id| !id.is_blank()).or(record.id),
            title: record.title,
            content: record.content,
            source: record.source,
            category: record.category,
        }
    }
}

impl Document {
    /// Creates a document with an id, title and content.
    pub fn new(
        id: impl Into<ArticleId>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            title: title.into(),
            content: content.into(),
            source: None,
            category: None,
        }
    }

    /// Sets the source label. Chainable.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// --- Chunks and points ---

fn default_source() -> String {
    "unknown".to_string()
}

/// Metadata stored alongside every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Owning document.
    pub article_id: ArticleId,
    /// 0-based position of the chunk inside its document.
    pub chunk_index: usize,
    /// Document title, copied for display and title matching.
    #[serde(default)]
    pub title: String,
    /// The chunk's own slice of the document body.
    #[serde(default)]
    pub content: String,
    /// The exact text that was embedded.
    #[serde(default)]
    pub text: String,
    /// Document source label.
    #[serde(default = "default_source")]
    pub source: String,
}

/// A word-window slice of one document, ready to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Globally unique id, used as the vector store point id.
    pub chunk_id: u64,
    /// Owning document.
    pub article_id: ArticleId,
    /// 0-based, contiguous position within the document.
    pub chunk_index: usize,
    /// Document title.
    pub title: String,
    /// Slice text.
    pub content: String,
    /// Embeddable text (title-prefixed slice).
    pub text: String,
    /// Document source label.
    pub source: String,
}

impl Chunk {
    /// The payload this chunk is stored with.
    pub fn payload(&self) -> ChunkPayload {
        ChunkPayload {
            article_id: self.article_id.clone(),
            chunk_index: self.chunk_index,
            title: self.title.clone(),
            content: self.content.clone(),
            text: self.text.clone(),
            source: self.source.clone(),
        }
    }

    /// Pairs the chunk with its embedding.
    pub fn into_point(self, vector: Vec<f32>) -> IndexedPoint {
        IndexedPoint {
            id: self.chunk_id,
            payload: self.payload(),
            vector,
        }
    }
}

/// The unit stored in the vector database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedPoint {
    /// Point id (the chunk id).
    pub id: u64,
    /// Embedding with exactly the collection's vector size.
    pub vector: Vec<f32>,
    /// Chunk metadata.
    pub payload: ChunkPayload,
}

/// A point read back from the store without a similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPoint {
    /// Point id.
    pub id: u64,
    /// Chunk metadata.
    pub payload: ChunkPayload,
    /// Stored vector, present only when explicitly requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// One ranked hit. Scores are only comparable within a single search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Point id.
    pub id: u64,
    /// Similarity or fusion score.
    pub score: f32,
    /// Chunk metadata.
    pub payload: ChunkPayload,
}

// --- Collections ---

/// Vector similarity metric of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Distance {
    /// Cosine similarity (higher is closer).
    #[default]
    Cosine,
    /// Dot product (higher is closer).
    Dot,
    /// Euclidean distance (lower is closer).
    Euclid,
}

impl FromStr for Distance {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(Distance::Cosine),
            "dot" => Ok(Distance::Dot),
            "euclid" | "euclidean" => Ok(Distance::Euclid),
            other => Err(RagError::Config(format!("unknown distance '{other}'"))),
        }
    }
}

/// Statistics reported for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    /// Number of stored points.
    pub points_count: u64,
    /// Number of stored vectors.
    pub vectors_count: u64,
    /// Store-reported status, e.g. `green`.
    pub status: String,
}

/// How candidate lists from several prefetch branches are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    /// Reciprocal rank fusion.
    #[default]
    Rrf,
    /// Distribution-based score fusion.
    Dbsf,
}

impl FusionMethod {
    /// Wire name understood by the vector store.
    pub fn as_str(self) -> &'static str {
        match self {
            FusionMethod::Rrf => "rrf",
            FusionMethod::Dbsf => "dbsf",
        }
    }
}

impl fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusionMethod {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rrf" => Ok(FusionMethod::Rrf),
            "dbsf" => Ok(FusionMethod::Dbsf),
            other => Err(RagError::Config(format!(
                "unknown fusion method '{other}' (expected 'rrf' or 'dbsf')"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_article_id_untagged_serde() {
        let int: ArticleId = serde_json::from_str("17").unwrap();
        assert_eq!(int, ArticleId::Int(17));
        let text: ArticleId = serde_json::from_str("\"abc-1\"").unwrap();
        assert_eq!(text, ArticleId::Text("abc-1".into()));
        assert_eq!(serde_json::to_string(&ArticleId::Int(5)).unwrap(), "5");
    }

    #[test]
    fn test_article_id_alternate() {
        assert_eq!(
            ArticleId::Text(" 42 ".into()).alternate(),
            Some(ArticleId::Int(42))
        );
        assert_eq!(
            ArticleId::Int(42).alternate(),
            Some(ArticleId::Text("42".into()))
        );
        assert_eq!(ArticleId::Text("intro".into()).alternate(), None);
    }

    #[test]
    fn test_document_accepts_article_id_alias() {
        let doc: Document =
            serde_json::from_str(r#"{"article_id": 9, "title": "T", "content": "body"}"#)
                .unwrap();
        assert_eq!(doc.id, Some(ArticleId::Int(9)));
        assert!(doc.source.is_none());

        let doc: Document = serde_json::from_str(r#"{"content": "no id"}"#).unwrap();
        assert!(doc.id.is_none());
        assert_eq!(doc.title, "");
    }

    #[test]
    fn test_document_with_both_id_keys_prefers_article_id() {
        let doc: Document = serde_json::from_str(
            r#"{"id": 1, "article_id": "wiki-7", "title": "T", "content": "body"}"#,
        )
        .unwrap();
        assert_eq!(doc.id, Some(ArticleId::Text("wiki-7".into())));

        let doc: Document =
            serde_json::from_str(r#"{"id": 3, "article_id": "  ", "content": "body"}"#).unwrap();
        assert_eq!(doc.id, Some(ArticleId::Int(3)));

        let doc: Document =
            serde_json::from_str(r#"{"id": 4, "article_id": null, "content": "body"}"#).unwrap();
        assert_eq!(doc.id, Some(ArticleId::Int(4)));
    }

    #[test]
    fn test_chunk_into_point_carries_payload() {
        let chunk = Chunk {
            chunk_id: 7,
            article_id: ArticleId::Int(1),
            chunk_index: 2,
            title: "Title".into(),
            content: "slice".into(),
            text: "# Title\n\nslice".into(),
            source: "unknown".into(),
        };
        let point = chunk.into_point(vec![0.1, 0.2]);
        assert_eq!(point.id, 7);
        assert_eq!(point.payload.chunk_index, 2);
        assert_eq!(point.payload.text, "# Title\n\nslice");
        assert_eq!(point.vector.len(), 2);
    }

    #[test]
    fn test_payload_source_defaults_to_unknown() {
        let payload: ChunkPayload =
            serde_json::from_str(r#"{"article_id": "a", "chunk_index": 0}"#).unwrap();
        assert_eq!(payload.source, "unknown");
    }

    #[test]
    fn test_fusion_method_parse() {
        assert_eq!("RRF".parse::<FusionMethod>().unwrap(), FusionMethod::Rrf);
        assert_eq!("dbsf".parse::<FusionMethod>().unwrap(), FusionMethod::Dbsf);
        assert!(matches!(
            "borda".parse::<FusionMethod>(),
            Err(RagError::Config(_))
        ));
    }

    #[test]
    fn test_distance_serializes_in_store_casing() {
        assert_eq!(serde_json::to_string(&Distance::Cosine).unwrap(), "\"Cosine\"");
        assert_eq!("euclidean".parse::<Distance>().unwrap(), Distance::Euclid);
    }
}
