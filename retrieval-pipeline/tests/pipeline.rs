use async_trait::async_trait;

use common::chunk::{Chunk, ContentType};
use common::conversation::ConversationContext;
use common::store::{ChunkStore, InMemoryChunkStore, ScoredRow, SimilarityMetric, StoreError};
use common::utils::embedding::EmbeddingProvider;

use retrieval_pipeline::{retrieve, RetrievalConfig, EMPTY_QUERY_LABEL, SYSTEM_BYPASS_LABEL};

const DIM: usize = 128;

async fn seeded_store(embedder: &EmbeddingProvider) -> InMemoryChunkStore {
    let store = InMemoryChunkStore::new();
    let corpus = [
        (
            "fund_steps",
            "Step 1: open the fund administration panel. Step 2: enter the fund name \
             and base currency. Step 3: assign the portfolio manager and save.",
            ContentType::Instruction,
            0.9,
        ),
        (
            "fund_toc",
            "1. Creating funds ... 12\n2. Editing funds ... 19\n3. Closing funds ... 24",
            ContentType::TableOfContents,
            0.8,
        ),
        (
            "fund_definition",
            "A fund is a pooled investment vehicle administered on behalf of clients.",
            ContentType::Definition,
            0.8,
        ),
        (
            "reporting",
            "Quarterly compliance reports are generated from the reporting module.",
            ContentType::Text,
            0.7,
        ),
    ];

    for (index, (id, content, content_type, quality)) in corpus.into_iter().enumerate() {
        let embedding = embedder.embed(content).await.expect("embed corpus chunk");
        let mut chunk = Chunk::new("handbook".into(), index as u32, content.into())
            .with_embedding(embedding)
            .with_content_type(content_type)
            .with_quality(quality);
        chunk.id = id.to_string();
        store.insert(chunk).await;
    }
    store
}

#[tokio::test]
async fn output_is_sorted_and_deduplicated() {
    let embedder = EmbeddingProvider::new_hashed(DIM);
    let store = seeded_store(&embedder).await;
    let config = RetrievalConfig::default();

    let output = retrieve(
        &store,
        &embedder,
        "How do I create a new fund?",
        &ConversationContext::default(),
        &config,
    )
    .await
    .expect("pipeline run");

    assert!(!output.chunks.is_empty());
    for pair in output.chunks.windows(2) {
        assert!(pair[0].relevance >= pair[1].relevance);
    }

    let mut ids: Vec<&str> = output.chunks.iter().map(|c| c.chunk.id.as_str()).collect();
    let before = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(before, ids.len());
}

#[tokio::test]
async fn instructional_content_outranks_toc_for_procedures() {
    let embedder = EmbeddingProvider::new_hashed(DIM);
    let store = seeded_store(&embedder).await;
    let config = RetrievalConfig::default();

    let output = retrieve(
        &store,
        &embedder,
        "How do I create a new fund?",
        &ConversationContext::default(),
        &config,
    )
    .await
    .expect("pipeline run");

    let rank_of = |id: &str| output.chunks.iter().position(|c| c.chunk.id == id);
    let steps = rank_of("fund_steps").expect("instructional chunk retrieved");
    if let Some(toc) = rank_of("fund_toc") {
        assert!(steps < toc, "steps ranked {steps}, toc ranked {toc}");
    }
}

#[tokio::test]
async fn health_probe_bypasses_the_store() {
    let embedder = EmbeddingProvider::new_hashed(DIM);
    let store = InMemoryChunkStore::new();
    let config = RetrievalConfig::default();

    let output = retrieve(
        &store,
        &embedder,
        "health check",
        &ConversationContext::default(),
        &config,
    )
    .await
    .expect("pipeline run");

    assert!(output.metadata.system_query);
    assert_eq!(output.strategy, SYSTEM_BYPASS_LABEL);
    assert!(output.chunks.is_empty());
    assert!((output.metadata.confidence - 1.0).abs() < f32::EPSILON);
}

#[tokio::test]
async fn empty_query_short_circuits() {
    let embedder = EmbeddingProvider::new_hashed(DIM);
    let store = InMemoryChunkStore::new();
    let config = RetrievalConfig::default();

    let output = retrieve(&store, &embedder, "   ", &ConversationContext::default(), &config)
        .await
        .expect("pipeline run");

    assert_eq!(output.strategy, EMPTY_QUERY_LABEL);
    assert!(output.chunks.is_empty());
    assert!(!output.metadata.system_query);
}

#[tokio::test]
async fn embedding_failure_degrades_to_lexical_retrieval() {
    let hashed = EmbeddingProvider::new_hashed(DIM);
    let store = seeded_store(&hashed).await;
    let failing = EmbeddingProvider::new_failing("backend offline");
    let config = RetrievalConfig::default();

    let output = retrieve(
        &store,
        &failing,
        "quarterly compliance reports",
        &ConversationContext::default(),
        &config,
    )
    .await
    .expect("pipeline run");

    assert!(output.metadata.fallback_applied);
    assert!(output.metadata.fallback_reason.is_some());
    assert!(output.chunks.iter().any(|c| c.chunk.id == "reporting"));
}

/// Store whose every call fails, as when the backing index is offline.
struct UnavailableStore;

#[async_trait]
impl ChunkStore for UnavailableStore {
    async fn vector_search(
        &self,
        _embedding: &[f32],
        _top_k: usize,
        _metric: SimilarityMetric,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        Err(StoreError::Unavailable("vector index offline".into()))
    }

    async fn lexical_search(&self, _text: &str, _top_k: usize) -> Result<Vec<ScoredRow>, StoreError> {
        Err(StoreError::Unavailable("vector index offline".into()))
    }

    async fn hybrid_search(
        &self,
        _text: &str,
        _embedding: &[f32],
        _top_k: usize,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        Err(StoreError::Unavailable("vector index offline".into()))
    }

    async fn fetch_by_ids(&self, _ids: &[String]) -> Result<Vec<Chunk>, StoreError> {
        Err(StoreError::Unavailable("vector index offline".into()))
    }

    async fn fetch_by_section(
        &self,
        _source_id: &str,
        _section_path: &str,
        _exclude_id: &str,
    ) -> Result<Vec<Chunk>, StoreError> {
        Err(StoreError::Unavailable("vector index offline".into()))
    }
}

#[tokio::test]
async fn store_outage_yields_empty_result_not_error() {
    let embedder = EmbeddingProvider::new_hashed(DIM);
    let config = RetrievalConfig::default();

    let output = retrieve(
        &UnavailableStore,
        &embedder,
        "fund administration overview",
        &ConversationContext::default(),
        &config,
    )
    .await
    .expect("store outage must degrade, not abort");

    assert!(output.chunks.is_empty());
    assert!(!output.metadata.system_query);
}

#[tokio::test]
async fn requested_strategy_is_honored() {
    let embedder = EmbeddingProvider::new_hashed(DIM);
    let store = seeded_store(&embedder).await;
    let config = RetrievalConfig::with_strategy("vector_only");

    let output = retrieve(
        &store,
        &embedder,
        "fund administration",
        &ConversationContext::default(),
        &config,
    )
    .await
    .expect("pipeline run");

    assert_eq!(output.strategy, "vector_only");
}

#[tokio::test]
async fn unknown_strategy_falls_back_to_hybrid() {
    let embedder = EmbeddingProvider::new_hashed(DIM);
    let store = seeded_store(&embedder).await;
    let config = RetrievalConfig::with_strategy("quantum_walk");

    let output = retrieve(
        &store,
        &embedder,
        "fund administration",
        &ConversationContext::default(),
        &config,
    )
    .await
    .expect("pipeline run");

    assert_eq!(output.strategy, "hybrid");
}

#[tokio::test]
async fn result_count_respects_cap() {
    let embedder = EmbeddingProvider::new_hashed(DIM);
    let store = seeded_store(&embedder).await;
    let mut config = RetrievalConfig::default();
    config.tuning.max_retrieved_chunks = 2;

    let output = retrieve(
        &store,
        &embedder,
        "fund reporting compliance",
        &ConversationContext::default(),
        &config,
    )
    .await
    .expect("pipeline run");

    assert!(output.chunks.len() <= 2);
}
