#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end tests for ragline-agent: index a small corpus in memory, then
//! answer questions through a mocked generation service.

use std::sync::Arc;

use futures_util::StreamExt;
use ragline_agent::{
    LlmClient, LlmProvider, ModelConfig, RagOrchestrator, RagSettings, DEFAULT_SYSTEM_PROMPT,
};
use ragline_core::{
    ArticleId, Distance, Document, IndexingConfig, RagError, SearchConfig, SnowflakeGenerator,
};
use ragline_memory::{
    CollectionGateway, InMemoryVectorStore, IndexingOptions, IndexingPipeline, LocalEmbedding,
};
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COLLECTION: &str = "articles";
const EMBEDDING_MODEL: &str = "local";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn repeat_words(vocabulary: &[&str], count: usize) -> String {
    vocabulary
        .iter()
        .cycle()
        .take(count)
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

async fn indexed_store() -> Arc<InMemoryVectorStore> {
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = IndexingPipeline::new(
        Arc::new(LocalEmbedding::new(128)),
        Arc::new(CollectionGateway::new(store.clone())),
        Arc::new(SnowflakeGenerator::default()),
    );
    let docs = vec![
        Document::new(
            1,
            "Ownership",
            repeat_words(&["ownership", "borrow", "checker", "moves", "drops"], 300),
        ),
        Document::new(
            2,
            "Volcanoes",
            repeat_words(&["volcano", "lava", "magma", "eruption", "ash"], 60),
        ),
    ];
    let options = IndexingOptions::new(IndexingConfig::default(), EMBEDDING_MODEL);
    pipeline.index(COLLECTION, &docs, &options).await.unwrap();
    store
}

fn settings(hybrid: bool) -> RagSettings {
    RagSettings {
        collection: COLLECTION.into(),
        embedding_model: EMBEDDING_MODEL.into(),
        task_type: "search".into(),
        search: SearchConfig {
            hybrid,
            limit: 3,
            ..SearchConfig::default()
        },
        system_prompt: None,
        answer_language: Some("English".into()),
    }
}

fn llm(server: &MockServer) -> LlmClient {
    LlmClient::new(ModelConfig {
        provider: LlmProvider::Ollama,
        api_base_url: Some(server.uri()),
        ..ModelConfig::default()
    })
    .unwrap()
}

fn orchestrator(store: Arc<InMemoryVectorStore>, server: &MockServer, hybrid: bool) -> RagOrchestrator {
    RagOrchestrator::new(
        Arc::new(LocalEmbedding::new(128)),
        store,
        llm(server),
        settings(hybrid),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn answer_cites_the_matching_article() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({
            "stream": false,
            "system": DEFAULT_SYSTEM_PROMPT
        })))
        .and(body_string_contains("User Question: how does the borrow checker work"))
        .and(body_string_contains("Answer in English."))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"response": "It tracks ownership.", "done": true})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let rag = orchestrator(indexed_store().await, &server, true);
    let answer = rag.answer("how does the borrow checker work").await.unwrap();

    assert_eq!(answer.answer, "It tracks ownership.");
    assert!(!answer.sources.is_empty());
    assert_eq!(answer.sources[0].article_id, ArticleId::Int(1));
    assert_eq!(answer.sources[0].index, 1);
}

#[tokio::test]
async fn retrieve_respects_article_filter_and_mode() {
    let server = MockServer::start().await;
    let store = indexed_store().await;

    for hybrid in [true, false] {
        let rag = orchestrator(store.clone(), &server, hybrid);
        let results = rag
            .retrieve("borrow checker", Some(ArticleId::Int(2)))
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.payload.article_id == ArticleId::Int(2)));
    }
}

#[tokio::test]
async fn answer_stream_yields_fragments_after_citations() {
    let server = MockServer::start().await;
    let body = [
        r#"{"response":"Lava ","done":false}"#,
        r#"{"response":"is molten rock.","done":false}"#,
        r#"{"response":"","done":true}"#,
    ]
    .join("\n");
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let rag = orchestrator(indexed_store().await, &server, true);
    let mut answer = rag.answer_stream("what is lava magma").await.unwrap();
    assert_eq!(answer.sources[0].article_id, ArticleId::Int(2));

    let mut fragments = Vec::new();
    while let Some(fragment) = answer.stream.next().await {
        fragments.push(fragment.unwrap());
    }
    assert_eq!(fragments, vec!["Lava ", "is molten rock."]);
}

#[tokio::test]
async fn generation_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
        .mount(&server)
        .await;

    let rag = orchestrator(indexed_store().await, &server, true);
    let err = rag.answer("borrow checker").await.unwrap_err();
    assert!(matches!(err, RagError::Generation(ref m) if m.contains("500")));
}

#[tokio::test]
async fn empty_collection_still_asks_the_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"response": "I don't know.", "done": true})),
        )
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryVectorStore::new());
    CollectionGateway::new(store.clone())
        .create_collection(COLLECTION, 128, Distance::Cosine, false)
        .await
        .unwrap();

    let rag = orchestrator(store, &server, true);
    let answer = rag.answer("anything").await.unwrap();
    assert!(answer.sources.is_empty());
    assert_eq!(answer.answer, "I don't know.");
}
