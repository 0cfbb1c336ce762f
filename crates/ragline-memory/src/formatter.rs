//! Model-family-aware text formatting applied before embedding.
//!
//! Embedding models are trained with different input conventions: some
//! expect a `title: ... | text: ...` frame, others a task prefix on queries.
//! [`detect_model_format`] maps a model name to a closed [`ModelFormat`]
//! family, and each family owns its document and query templates.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Label prepended to CJK search queries for BGE models.
pub const DEFAULT_CJK_QUERY_PREFIX: &str = "查询: ";

/// Known name patterns, in match order.
const MODEL_PATTERNS: &[(&str, ModelFormat)] = &[
    ("embeddinggemma", ModelFormat::Gemma),
    ("embedding-gemma", ModelFormat::Gemma),
    ("gemma", ModelFormat::Gemma),
    ("bge", ModelFormat::Bge),
    ("bge-m3", ModelFormat::Bge),
    ("bge-large", ModelFormat::Bge),
    ("bge-base", ModelFormat::Bge),
    ("bge-small", ModelFormat::Bge),
    ("sentence-transformers", ModelFormat::SentenceTransformers),
    ("all-minilm", ModelFormat::SentenceTransformers),
    ("all-mpnet", ModelFormat::SentenceTransformers),
    ("text-embedding", ModelFormat::OpenAi),
    ("ada", ModelFormat::OpenAi),
    ("default", ModelFormat::Default),
];

static TAG_SUFFIX: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[:@].*$").ok());
static SIZE_SUFFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[-_]?\d+[kmb]?$").ok());

/// Embedding model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModelFormat {
    /// EmbeddingGemma: task-framed queries, `title | text` documents.
    Gemma,
    /// BGE family: plain text, optional CJK query label.
    Bge,
    /// sentence-transformers checkpoints such as all-MiniLM.
    SentenceTransformers,
    /// OpenAI `text-embedding-*` and `ada` models.
    OpenAi,
    /// Anything unrecognized.
    #[default]
    Default,
}

impl ModelFormat {
    /// Stable identifier of the family.
    pub fn as_str(self) -> &'static str {
        match self {
            ModelFormat::Gemma => "gemma",
            ModelFormat::Bge => "bge",
            ModelFormat::SentenceTransformers => "sentence_transformers",
            ModelFormat::OpenAi => "openai",
            ModelFormat::Default => "default",
        }
    }

    /// Formats a document for this family. A blank title counts as absent.
    pub fn document(self, title: &str, content: &str) -> String {
        let title = title.trim();
        match self {
            ModelFormat::Gemma => {
                let title = if title.is_empty() { "none" } else { title };
                format!("title: {title} | text: {content}")
            }
            _ if title.is_empty() => content.to_string(),
            ModelFormat::Bge => format!("{title}\n\n{content}"),
            ModelFormat::SentenceTransformers => format!("{title}: {content}"),
            ModelFormat::OpenAi => format!("Title: {title}\n\nContent: {content}"),
            ModelFormat::Default => format!("# {title}\n\n{content}"),
        }
    }

    /// Formats a query for this family with the default CJK label.
    pub fn query(self, query: &str, task_type: &str) -> String {
        self.query_with_prefix(query, task_type, DEFAULT_CJK_QUERY_PREFIX)
    }

    fn query_with_prefix(self, query: &str, task_type: &str, cjk_prefix: &str) -> String {
        let task = task_type.trim().to_lowercase();
        match self {
            ModelFormat::Gemma => format!("task: {} | query: {query}", gemma_task(&task)),
            ModelFormat::Bge if matches!(task.as_str(), "search" | "retrieval") && has_cjk(query) => {
                format!("{cjk_prefix}{query}")
            }
            _ => query.to_string(),
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn gemma_task(task: &str) -> &'static str {
    match task {
        "qa" | "question_answering" => "question answering",
        "fact_checking" => "fact checking",
        "classification" => "classification",
        "clustering" => "clustering",
        "similarity" => "sentence similarity",
        "code" | "code_retrieval" => "code retrieval",
        _ => "search result",
    }
}

fn has_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// Classifies a model name into a [`ModelFormat`].
///
/// The name is lower-cased, stripped of any `:tag` / `@digest` suffix and of
/// a trailing size marker such as `-567m`, then matched exactly against the
/// known patterns and finally by substring in pattern order. Never fails.
pub fn detect_model_format(model_name: &str) -> ModelFormat {
    let mut name = model_name.trim().to_lowercase();
    if name.is_empty() {
        return ModelFormat::Default;
    }
    if let Some(re) = TAG_SUFFIX.as_ref() {
        name = re.replace(&name, "").into_owned();
    }
    if let Some(re) = SIZE_SUFFIX.as_ref() {
        name = re.replace(&name, "").into_owned();
    }

    if let Some((_, format)) = MODEL_PATTERNS.iter().find(|(p, _)| *p == name) {
        return *format;
    }
    MODEL_PATTERNS
        .iter()
        .find(|(p, _)| name.contains(p))
        .map(|(_, format)| *format)
        .unwrap_or_default()
}

/// Formats a document for whichever family `model_name` belongs to.
pub fn format_document(title: &str, content: &str, model_name: &str) -> String {
    detect_model_format(model_name).document(title, content)
}

/// Formats a query for whichever family `model_name` belongs to.
pub fn format_query(query: &str, model_name: &str, task_type: &str) -> String {
    detect_model_format(model_name).query(query, task_type)
}

/// Known name patterns and the family each maps to, in match order.
pub fn supported_models() -> Vec<(&'static str, ModelFormat)> {
    MODEL_PATTERNS.to_vec()
}

/// Formatter with a configurable CJK query label for BGE models.
#[derive(Debug, Clone)]
pub struct EmbeddingFormatter {
    cjk_query_prefix: String,
}

impl EmbeddingFormatter {
    /// Creates a formatter with the default CJK label.
    pub fn new() -> Self {
        Self {
            cjk_query_prefix: DEFAULT_CJK_QUERY_PREFIX.to_string(),
        }
    }

    /// Replaces the CJK query label. Chainable.
    pub fn with_cjk_query_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cjk_query_prefix = prefix.into();
        self
    }

    /// See [`format_document`].
    pub fn format_document(&self, title: &str, content: &str, model_name: &str) -> String {
        format_document(title, content, model_name)
    }

    /// See [`format_query`]; uses this formatter's CJK label.
    pub fn format_query(&self, query: &str, model_name: &str, task_type: &str) -> String {
        detect_model_format(model_name).query_with_prefix(query, task_type, &self.cjk_query_prefix)
    }
}

impl Default for EmbeddingFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_families_from_tagged_names() {
        assert_eq!(detect_model_format("embeddinggemma:latest"), ModelFormat::Gemma);
        assert_eq!(detect_model_format("EmbeddingGemma:300m"), ModelFormat::Gemma);
        assert_eq!(detect_model_format("bge-m3:567m"), ModelFormat::Bge);
        assert_eq!(detect_model_format("bge-large-en-v1.5"), ModelFormat::Bge);
        assert_eq!(detect_model_format("all-minilm:l6-v2"), ModelFormat::SentenceTransformers);
        assert_eq!(detect_model_format("text-embedding-3-small"), ModelFormat::OpenAi);
        assert_eq!(detect_model_format("nomic-embed-text"), ModelFormat::Default);
    }

    #[test]
    fn test_detection_is_total() {
        for name in ["", "   ", ":", "@@", "-1b", "模型", "😀:latest", "\u{0}"] {
            let _ = detect_model_format(name);
        }
        assert_eq!(detect_model_format(""), ModelFormat::Default);
    }

    #[test]
    fn test_gemma_templates() {
        let f = ModelFormat::Gemma;
        assert_eq!(f.document("Rust", "body"), "title: Rust | text: body");
        assert_eq!(f.document("  ", "body"), "title: none | text: body");
        assert_eq!(f.query("borrow", "search"), "task: search result | query: borrow");
        assert_eq!(f.query("q", "QA"), "task: question answering | query: q");
        assert_eq!(f.query("q", "similarity"), "task: sentence similarity | query: q");
        assert_eq!(f.query("q", "unknown-task"), "task: search result | query: q");
    }

    #[test]
    fn test_document_templates_per_family() {
        assert_eq!(ModelFormat::Bge.document(" T ", "c"), "T\n\nc");
        assert_eq!(ModelFormat::SentenceTransformers.document("T", "c"), "T: c");
        assert_eq!(ModelFormat::OpenAi.document("T", "c"), "Title: T\n\nContent: c");
        assert_eq!(ModelFormat::Default.document("T", "c"), "# T\n\nc");
        for f in [
            ModelFormat::Bge,
            ModelFormat::SentenceTransformers,
            ModelFormat::OpenAi,
            ModelFormat::Default,
        ] {
            assert_eq!(f.document("", "bare"), "bare");
        }
    }

    #[test]
    fn test_bge_cjk_prefix_only_for_search() {
        assert_eq!(format_query("什么是向量", "bge-m3", "search"), "查询: 什么是向量");
        assert_eq!(format_query("什么是向量", "bge-m3", "qa"), "什么是向量");
        assert_eq!(format_query("what is a vector", "bge-m3", "retrieval"), "what is a vector");
        assert_eq!(format_query("什么", "all-mpnet", "search"), "什么");
    }

    #[test]
    fn test_custom_cjk_prefix() {
        let f = EmbeddingFormatter::new().with_cjk_query_prefix("query: ");
        assert_eq!(f.format_query("向量", "bge", "search"), "query: 向量");
        assert_eq!(f.format_document("T", "c", "bge"), "T\n\nc");
    }

    #[test]
    fn test_supported_models_lists_patterns_in_order() {
        let models = supported_models();
        assert_eq!(models.first().map(|m| m.0), Some("embeddinggemma"));
        assert_eq!(models.last().map(|m| m.1), Some(ModelFormat::Default));
    }
}
