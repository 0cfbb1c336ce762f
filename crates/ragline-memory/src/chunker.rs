use ragline_core::{Chunk, Document, IdGenerator, RagError, RagResult};

use crate::formatter::ModelFormat;

/// Default words per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 150;
/// Default words shared by consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 30;
/// Default cap on chunks kept per document.
pub const DEFAULT_MAX_CHUNKS: usize = 10;

/// Splits `text` into overlapping windows of `chunk_size` words.
///
/// Words are separated by any whitespace and re-joined with single spaces.
/// A text of at most `chunk_size` words comes back unchanged as one chunk;
/// an empty or whitespace-only text yields no chunks. The window advances by
/// `chunk_size - overlap` words and the last window is clipped, not padded.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> RagResult<Vec<String>> {
    let step = window_step(chunk_size, overlap)?;

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Ok(Vec::new());
    }
    if words.len() <= chunk_size {
        return Ok(vec![text.to_string()]);
    }

    let mut chunks = Vec::with_capacity(words.len().div_ceil(step));
    let mut start = 0;
    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end >= words.len() {
            break;
        }
        start += step;
    }
    Ok(chunks)
}

fn window_step(chunk_size: usize, overlap: usize) -> RagResult<usize> {
    if chunk_size == 0 {
        return Err(RagError::Config("chunk size must be at least 1 word".into()));
    }
    if overlap >= chunk_size {
        return Err(RagError::Config(format!(
            "chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
        )));
    }
    Ok(chunk_size - overlap)
}

/// How a chunk's embeddable `text` is built from its title and slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkTextStyle {
    /// `"# {title}\n\n{slice}"`.
    #[default]
    MarkdownTitle,
    /// The document template of an embedding model family.
    Model(ModelFormat),
}

/// Turns documents into capped, id-stamped chunk lists.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    max_chunks: usize,
    style: ChunkTextStyle,
}

impl Chunker {
    /// Creates a chunker, rejecting a non-positive slide step or a zero cap.
    pub fn new(chunk_size: usize, overlap: usize, max_chunks: usize) -> RagResult<Self> {
        window_step(chunk_size, overlap)?;
        if max_chunks == 0 {
            return Err(RagError::Config(
                "max chunks per article must be at least 1".into(),
            ));
        }
        Ok(Self {
            chunk_size,
            overlap,
            max_chunks,
            style: ChunkTextStyle::default(),
        })
    }

    /// Sets how embeddable chunk text is built. Chainable.
    pub fn with_style(mut self, style: ChunkTextStyle) -> Self {
        self.style = style;
        self
    }

    /// Words per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Words shared by consecutive chunks.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Per-document chunk cap.
    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    /// Word windows of `text`, without the per-document cap.
    pub fn split(&self, text: &str) -> Vec<String> {
        // Parameters were checked in `new`, so the window step is positive.
        chunk_text(text, self.chunk_size, self.overlap).unwrap_or_default()
    }

    /// Chunks one document.
    ///
    /// Returns `None` for documents without a usable id or with blank
    /// content; those are skipped by the caller, not treated as errors.
    /// Chunks past `max_chunks` are dropped.
    pub fn chunk_document(&self, doc: &Document, ids: &dyn IdGenerator) -> Option<Vec<Chunk>> {
        let article_id = doc.id.as_ref().filter(|id| !id.is_blank())?;
        if doc.content.trim().is_empty() {
            return None;
        }

        let source = doc
            .source
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("unknown");

        let chunks = self
            .split(&doc.content)
            .into_iter()
            .take(self.max_chunks)
            .enumerate()
            .map(|(chunk_index, content)| Chunk {
                chunk_id: ids.next_id(),
                article_id: article_id.clone(),
                chunk_index,
                title: doc.title.clone(),
                text: self.embeddable_text(&doc.title, &content),
                content,
                source: source.to_string(),
            })
            .collect();
        Some(chunks)
    }

    fn embeddable_text(&self, title: &str, content: &str) -> String {
        match self.style {
            ChunkTextStyle::MarkdownTitle => format!("# {title}\n\n{content}"),
            ChunkTextStyle::Model(format) => format.document(title, content),
        }
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            max_chunks: DEFAULT_MAX_CHUNKS,
            style: ChunkTextStyle::default(),
        }
    }
}
