//! End-to-end scenarios over the full answer pipeline with stub providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use uttar_rag::embeddings::HashingEmbedder;
use uttar_rag::index::metadata::MetadataStore;
use uttar_rag::index::{IndexParams, VectorIndex};
use uttar_rag::llm::{GenerationOptions, LanguageModel, StubBehavior, StubLanguageModel};
use uttar_rag::types::UserMetadata;
use uttar_rag::{App, IndexRequest, MatchType, QaConfig, QueryRequest, Result, SimilaritySpace};

const DIM: usize = 512;

fn test_config() -> QaConfig {
    let mut config = QaConfig::default();
    config.index.dimension = DIM;
    config.index.capacity = 10_000;
    config
}

fn app_with(config: QaConfig, llm: Arc<dyn LanguageModel>) -> App {
    App::new(config, Arc::new(HashingEmbedder::new(DIM)), llm, None).unwrap()
}

fn sky_doc() -> IndexRequest {
    IndexRequest {
        doc_id: "d1".into(),
        text: "The sky is blue due to Rayleigh scattering.".into(),
        metadata: UserMetadata::new(),
    }
}

#[test]
fn test_empty_corpus_refuses() {
    let app = app_with(test_config(), Arc::new(StubLanguageModel::answering(0.9)));
    let response = app.query(&QueryRequest::new("What is X?")).unwrap();

    assert!(response.answer.starts_with("Insufficient evidence"));
    assert!(response.citations.is_empty());
    assert!(response.confidence < 0.70);
    assert!(!response.from_cache);
    assert_eq!(app.stats().metrics.refusals_total, 1);
}

#[test]
fn test_single_doc_grounded_answer_then_exact_cache_hit() {
    let app = app_with(test_config(), Arc::new(StubLanguageModel::answering(0.9)));
    app.index_document(sky_doc()).unwrap();

    let first = app.query(&QueryRequest::new("Why is the sky blue?")).unwrap();
    assert!(first.answer.contains("Rayleigh"));
    assert!(first.citations.iter().any(|c| c.doc_id == "d1"));
    assert!(first.confidence >= 0.70);
    assert!(!first.from_cache);
    assert_eq!(
        first.verification.as_ref().map(|v| v.verified),
        Some(true)
    );

    let second = app.query(&QueryRequest::new("Why is the sky blue?")).unwrap();
    assert!(second.from_cache);
    assert_eq!(second.match_type, Some(MatchType::Exact));
    assert_eq!(second.similarity, Some(1.0));
    assert_eq!(second.answer, first.answer);
    assert_eq!(app.stats().metrics.cache_hits_exact, 1);
}

#[test]
fn test_fuzzy_cache_hit_on_paraphrase() {
    let app = app_with(test_config(), Arc::new(StubLanguageModel::answering(0.9)));
    app.index_document(sky_doc()).unwrap();
    app.query(&QueryRequest::new("Why is the sky blue?")).unwrap();

    let mut request = QueryRequest::new("Why does the sky appear blue?");
    request.fuzzy_threshold = Some(0.65);
    let response = app.query(&request).unwrap();

    assert!(response.from_cache);
    assert_eq!(response.match_type, Some(MatchType::Fuzzy));
    assert!(response.similarity.unwrap() >= 0.65);
    assert!(response.answer.contains("Rayleigh"));
    assert_eq!(app.stats().metrics.cache_hits_fuzzy, 1);
}

#[test]
fn test_snapshot_roundtrip_preserves_search_results() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("corpus.baix");

    let params = IndexParams {
        dimension: 16,
        capacity: 5_000,
        m: 8,
        ef_construction: 64,
        ef_search: 32,
        space: SimilaritySpace::Cosine,
        seed: 17,
    };
    let index = VectorIndex::new(params.clone());
    let store = MetadataStore::new();
    let embedder = HashingEmbedder::new(16);
    use uttar_rag::{Deadline, Embedder};
    for i in 0..200 {
        let text = format!("document {} about topic{} with term{}", i, i % 20, i % 7);
        let embedding = embedder.embed(&text, Deadline::within_ms(1_000))?;
        index.add_document(&store, &format!("doc-{}", i), &embedding, &text, UserMetadata::new())?;
    }
    index.save(&store, &path)?;

    let restored = VectorIndex::new(params);
    let restored_store = MetadataStore::new();
    restored.load(&restored_store, &path)?;
    assert_eq!(restored.len(), index.len());

    for i in 0..50 {
        let query = embedder.embed(&format!("topic{} term{}", i % 20, i % 7), Deadline::within_ms(1_000))?;
        let original = index.search(&store, &query, 10, 0.0, None)?;
        let reloaded = restored.search(&restored_store, &query, 10, 0.0, None)?;
        assert_eq!(original, reloaded);
    }
    Ok(())
}

#[test]
fn test_dimension_mismatch_is_invalid_input() {
    let params = IndexParams {
        dimension: 384,
        capacity: 100,
        m: 8,
        ef_construction: 64,
        ef_search: 32,
        space: SimilaritySpace::Cosine,
        seed: 1,
    };
    let index = VectorIndex::new(params);
    let store = MetadataStore::new();

    let err = index
        .add_document(&store, "d1", &vec![0.5; 512], "text", UserMetadata::new())
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");
    assert_eq!(index.len(), 0);
}

#[test]
fn test_solver_timeout_uses_partial_results() {
    let mut config = test_config();
    config.timeouts.solver_ms = 50;
    config.solver.num_solvers = 3;
    let llm = Arc::new(StubLanguageModel::new(vec![
        StubBehavior::Sleep(Duration::from_millis(250)),
        StubBehavior::Answer { confidence: 0.85 },
        StubBehavior::Answer { confidence: 0.85 },
    ]));
    let app = app_with(config, llm);
    app.index_document(sky_doc()).unwrap();

    let mut request = QueryRequest::new("Why is the sky blue?");
    request.use_multi_agent = Some(true);
    let response = app.query(&request).unwrap();

    assert!(response.answer.contains("Rayleigh"));
    assert_eq!(app.stats().metrics.timeouts_solver, 1);
}

#[test]
fn test_kill_switch_rejects_new_requests_but_inflight_complete() {
    let mut config = test_config();
    config.cache.min_confidence = 0.99; // keep every query on the cold path
    let llm = Arc::new(StubLanguageModel::new(vec![StubBehavior::Sleep(
        Duration::from_millis(200),
    )]));
    let app = Arc::new(app_with(config, llm));
    app.index_document(sky_doc()).unwrap();

    let inflight = {
        let app = app.clone();
        std::thread::spawn(move || app.query(&QueryRequest::new("Why is the sky blue?")))
    };
    std::thread::sleep(Duration::from_millis(50));
    app.trigger_kill();

    let err = app
        .query(&QueryRequest::new("Why is the sky blue again?"))
        .unwrap_err();
    assert_eq!(err.kind(), "SERVICE_UNAVAILABLE");

    // The earlier request still runs to completion.
    assert!(inflight.join().unwrap().is_ok());

    app.release_kill();
    assert!(app.query(&QueryRequest::new("Why is the sky blue?")).is_ok());
}

struct SlowGroundedModel {
    calls: AtomicUsize,
    delay: Duration,
}

impl LanguageModel for SlowGroundedModel {
    fn generate(&self, prompt: &str, _opts: &GenerationOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let passage = prompt
            .lines()
            .find(|l| l.trim_start().starts_with('['))
            .unwrap_or("")
            .trim();
        Ok(format!("{}\nCONFIDENCE: 0.9", passage))
    }
}

#[test]
fn test_concurrent_identical_questions_coalesce_to_one_dispatch() {
    let llm = Arc::new(SlowGroundedModel {
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(150),
    });
    let app = Arc::new(app_with(test_config(), llm.clone()));
    app.index_document(sky_doc()).unwrap();

    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let app = app.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                app.query(&QueryRequest::new("Why is the sky blue?"))
            })
        })
        .collect();

    let responses: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    assert!(responses.iter().all(|r| r.answer.contains("Rayleigh")));
    // One leader computed; everyone else coalesced or hit the fresh cache.
    let leaders = responses
        .iter()
        .filter(|r| !r.coalesced && !r.from_cache)
        .count();
    assert_eq!(leaders, 1);
}

#[test]
fn test_deleted_document_stops_being_cited() {
    let app = app_with(test_config(), Arc::new(StubLanguageModel::answering(0.9)));
    app.index_document(sky_doc()).unwrap();
    assert!(app.delete_document("d1"));

    let response = app.query(&QueryRequest::new("Why is the sky blue?")).unwrap();
    assert!(response.answer.starts_with("Insufficient evidence"));
    assert!(response.citations.is_empty());
    assert_eq!(app.document_count(), 0);
}

#[test]
fn test_admin_surface() {
    let app = app_with(test_config(), Arc::new(StubLanguageModel::answering(0.9)));
    app.index_document(sky_doc()).unwrap();
    app.query(&QueryRequest::new("Why is the sky blue?")).unwrap();

    let stats = app.stats();
    assert_eq!(stats.documents, 1);
    assert!(!stats.kill_switch_active);
    assert_eq!(stats.cache.count, 1);
    assert_eq!(stats.metrics.queries_total, 1);

    let facts = app.facts(10);
    assert_eq!(facts.len(), 1);
    assert!(facts[0].answer.contains("Rayleigh"));

    app.clear_cache();
    assert_eq!(app.facts_stats().count, 0);
    // Documents survive a cache clear.
    assert_eq!(app.document_count(), 1);
}

#[test]
fn test_batch_ingest_reports_partial_success() {
    let app = app_with(test_config(), Arc::new(StubLanguageModel::answering(0.9)));
    let report = app.index_batch(vec![
        IndexRequest {
            doc_id: "a".into(),
            text: "first document".into(),
            metadata: UserMetadata::new(),
        },
        IndexRequest {
            doc_id: "".into(),
            text: "missing id".into(),
            metadata: UserMetadata::new(),
        },
        IndexRequest {
            doc_id: "c".into(),
            text: "third document".into(),
            metadata: UserMetadata::new(),
        },
    ]);

    assert_eq!(report.total, 3);
    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(app.document_count(), 2);
}

#[test]
fn test_empty_query_is_invalid_input() {
    let app = app_with(test_config(), Arc::new(StubLanguageModel::answering(0.9)));
    let err = app.query(&QueryRequest::new("   ")).unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");
}
