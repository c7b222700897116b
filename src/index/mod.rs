//! Vector index: HNSW graph, document bookkeeping, and persistence.
//!
//! Single writer / many readers: searches take the read lock, mutations and
//! snapshot loads take the write lock, and `save` snapshots under the read
//! lock so queries keep flowing during persistence.

pub mod hnsw;
pub mod metadata;
pub mod snapshot;
pub mod space;

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use parking_lot::RwLock;

use crate::deadline::Deadline;
use crate::error::{QaError, Result};
use crate::types::{AddOutcome, BatchError, BatchItem, BatchReport, SearchHit, UserMetadata};

use hnsw::HnswGraph;
use metadata::MetadataStore;
use space::SimilaritySpace;

/// Construction-time parameters of a [`VectorIndex`].
#[derive(Debug, Clone)]
pub struct IndexParams {
    pub dimension: usize,
    pub capacity: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub space: SimilaritySpace,
    pub seed: u64,
}

impl From<&crate::config::IndexConfig> for IndexParams {
    fn from(c: &crate::config::IndexConfig) -> Self {
        Self {
            dimension: c.dimension,
            capacity: c.capacity,
            m: c.m,
            ef_construction: c.ef_construction,
            ef_search: c.ef_search,
            space: c.space,
            seed: c.seed,
        }
    }
}

struct IndexInner {
    graph: HnswGraph,
    /// Current node per live doc id. Updates insert a fresh node; the old
    /// node goes stale and is filtered out of searches.
    doc_to_node: HashMap<String, u32>,
    /// Doc id each node was created for, by node id.
    node_doc: Vec<String>,
    /// Bumped on every mutation; embedded in snapshots.
    generation: u64,
    ef_search: usize,
}

impl IndexInner {
    fn live(&self, node: u32, store: &MetadataStore) -> bool {
        let doc_id = &self.node_doc[node as usize];
        self.doc_to_node.get(doc_id) == Some(&node) && store.has(doc_id)
    }
}

pub struct VectorIndex {
    params: IndexParams,
    inner: RwLock<IndexInner>,
}

impl VectorIndex {
    pub fn new(params: IndexParams) -> Self {
        let graph = HnswGraph::new(
            params.dimension,
            params.space,
            params.m,
            params.ef_construction,
            params.seed,
        );
        let ef_search = params.ef_search;
        Self {
            params,
            inner: RwLock::new(IndexInner {
                graph,
                doc_to_node: HashMap::new(),
                node_doc: Vec::new(),
                generation: 0,
                ef_search,
            }),
        }
    }

    pub fn dimension(&self) -> usize {
        self.params.dimension
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.inner.read().doc_to_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Adjust the search width. Clamped below at 1; callers should keep it
    /// at or above their `k` for adequate recall.
    pub fn set_ef_search(&self, ef: usize) {
        self.inner.write().ef_search = ef.max(1);
    }

    /// Add a document, updating the metadata store under the same write
    /// lock. A duplicate `doc_id` is an update (delete-then-add).
    pub fn add_document(
        &self,
        store: &MetadataStore,
        doc_id: &str,
        embedding: &[f32],
        text: &str,
        user_metadata: UserMetadata,
    ) -> Result<AddOutcome> {
        let mut inner = self.inner.write();
        self.add_locked(&mut inner, store, doc_id, embedding, text, user_metadata)
    }

    fn add_locked(
        &self,
        inner: &mut IndexInner,
        store: &MetadataStore,
        doc_id: &str,
        embedding: &[f32],
        text: &str,
        user_metadata: UserMetadata,
    ) -> Result<AddOutcome> {
        if doc_id.is_empty() {
            return Err(QaError::InvalidInput("doc_id must be non-empty".into()));
        }
        if embedding.len() != self.params.dimension {
            return Err(QaError::InvalidInput(format!(
                "embedding dimension {} does not match index dimension {}",
                embedding.len(),
                self.params.dimension
            )));
        }
        let updating = inner.doc_to_node.contains_key(doc_id);
        if !updating && inner.doc_to_node.len() >= self.params.capacity {
            return Err(QaError::CapacityExceeded(format!(
                "index is full ({} documents)",
                self.params.capacity
            )));
        }

        let node = inner.graph.insert(embedding)?;
        inner.node_doc.push(doc_id.to_string());
        inner.doc_to_node.insert(doc_id.to_string(), node);
        inner.generation += 1;
        store.put(doc_id, text.to_string(), user_metadata);

        tracing::debug!(
            doc_id,
            node,
            updating,
            generation = inner.generation,
            "indexed document"
        );
        Ok(if updating {
            AddOutcome::Updated
        } else {
            AddOutcome::Inserted
        })
    }

    /// Ingest a batch under one write-lock acquisition. Items succeed or
    /// fail individually; the report makes partial success explicit.
    pub fn add_batch(&self, store: &MetadataStore, items: Vec<BatchItem>) -> BatchReport {
        let started = Instant::now();
        let total = items.len();
        let mut errors = Vec::new();
        let mut successful = 0usize;

        let mut inner = self.inner.write();
        for item in items {
            match self.add_locked(
                &mut inner,
                store,
                &item.doc_id,
                &item.embedding,
                &item.text,
                item.user_metadata,
            ) {
                Ok(_) => successful += 1,
                Err(e) => errors.push(BatchError {
                    doc_id: item.doc_id,
                    error: e.to_string(),
                }),
            }
        }
        drop(inner);

        let report = BatchReport {
            total,
            successful,
            failed: errors.len(),
            errors,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            elapsed_ms = report.elapsed_ms,
            "batch ingest finished"
        );
        report
    }

    /// ANN search. Results are normalized similarities in `[0, 1]`, sorted
    /// descending, with sub-threshold and stale entries elided.
    pub fn search(
        &self,
        store: &MetadataStore,
        query: &[f32],
        k: usize,
        threshold: f32,
        deadline: Option<Deadline>,
    ) -> Result<Vec<SearchHit>> {
        if query.len() != self.params.dimension {
            return Err(QaError::InvalidInput(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.params.dimension
            )));
        }
        let inner = self.inner.read();
        let ef = inner.ef_search.max(k);
        let raw = inner
            .graph
            .search(query, k, ef, deadline, &|node| inner.live(node, store))?;

        Ok(raw
            .into_iter()
            .filter(|(_, sim)| *sim >= threshold)
            .enumerate()
            .map(|(rank, (node, similarity))| SearchHit {
                doc_id: inner.node_doc[node as usize].clone(),
                similarity,
                rank,
            })
            .collect())
    }

    /// Drop a document's index mapping. The graph node stays behind and is
    /// filtered from results; the caller removes the metadata record.
    pub fn remove(&self, doc_id: &str) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.doc_to_node.remove(doc_id).is_some();
        if removed {
            inner.generation += 1;
        }
        removed
    }

    /// Reset to an empty index with the same parameters.
    pub fn clear(&self, store: &MetadataStore) {
        let mut inner = self.inner.write();
        inner.graph = HnswGraph::new(
            self.params.dimension,
            self.params.space,
            self.params.m,
            self.params.ef_construction,
            self.params.seed,
        );
        inner.doc_to_node.clear();
        inner.node_doc.clear();
        inner.generation += 1;
        store.clear();
    }

    /// Persist the index and the metadata sidecar. Runs under the read lock
    /// so searches are not stalled; concurrent writers wait as usual.
    pub fn save(&self, store: &MetadataStore, path: &Path) -> Result<()> {
        let inner = self.inner.read();
        let docs = store.all();
        snapshot::write_snapshot(path, &inner.graph, &inner.node_doc, inner.generation, &docs)?;
        tracing::info!(
            path = %path.display(),
            nodes = inner.graph.len(),
            documents = docs.len(),
            generation = inner.generation,
            "snapshot written"
        );
        Ok(())
    }

    /// Replace in-memory state from a snapshot. Validation happens before
    /// the swap, so a failed load leaves the index (and the store) unchanged.
    pub fn load(&self, store: &MetadataStore, path: &Path) -> Result<()> {
        let contents = snapshot::read_snapshot(path, self.params.dimension)?;

        let mut doc_to_node: HashMap<String, u32> = HashMap::new();
        for (node, doc_id) in contents.node_doc.iter().enumerate() {
            // Highest node id wins: updates always insert a fresh node.
            doc_to_node.insert(doc_id.clone(), node as u32);
        }
        let live_ids: std::collections::HashSet<&String> =
            contents.documents.iter().map(|d| &d.doc_id).collect();
        doc_to_node.retain(|doc_id, _| live_ids.contains(doc_id));

        let mut inner = self.inner.write();
        store.clear();
        for doc in contents.documents {
            store.put_record(doc);
        }
        inner.graph = contents.graph;
        inner.node_doc = contents.node_doc;
        inner.doc_to_node = doc_to_node;
        inner.generation = contents.generation;
        tracing::info!(
            path = %path.display(),
            documents = inner.doc_to_node.len(),
            generation = inner.generation,
            "snapshot loaded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(dimension: usize) -> IndexParams {
        IndexParams {
            dimension,
            capacity: 100,
            m: 8,
            ef_construction: 64,
            ef_search: 32,
            space: SimilaritySpace::Cosine,
            seed: 42,
        }
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_added_document_is_found_with_high_similarity() {
        let index = VectorIndex::new(params(8));
        let store = MetadataStore::new();
        for i in 0..8 {
            index
                .add_document(
                    &store,
                    &format!("d{}", i),
                    &unit(8, i),
                    "text",
                    UserMetadata::new(),
                )
                .unwrap();
        }

        for i in 0..8 {
            let hits = index.search(&store, &unit(8, i), 1, 0.0, None).unwrap();
            assert_eq!(hits[0].doc_id, format!("d{}", i));
            assert!(hits[0].similarity >= 0.99);
            assert_eq!(hits[0].rank, 0);
        }
    }

    #[test]
    fn test_dimension_mismatch_leaves_index_unchanged() {
        let index = VectorIndex::new(params(8));
        let store = MetadataStore::new();
        let err = index
            .add_document(&store, "d1", &unit(4, 0), "text", UserMetadata::new())
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
        assert_eq!(index.len(), 0);
        assert_eq!(store.len(), 0);

        let err = index.search(&store, &unit(4, 0), 1, 0.0, None).unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[test]
    fn test_duplicate_doc_id_is_an_update() {
        let index = VectorIndex::new(params(4));
        let store = MetadataStore::new();
        let out = index
            .add_document(&store, "d1", &unit(4, 0), "old", UserMetadata::new())
            .unwrap();
        assert_eq!(out, AddOutcome::Inserted);
        let out = index
            .add_document(&store, "d1", &unit(4, 3), "new", UserMetadata::new())
            .unwrap();
        assert_eq!(out, AddOutcome::Updated);

        assert_eq!(index.len(), 1);
        let hits = index.search(&store, &unit(4, 3), 1, 0.0, None).unwrap();
        assert_eq!(hits[0].doc_id, "d1");
        assert!(hits[0].similarity >= 0.99);
        assert_eq!(store.get("d1").unwrap().text, "new");

        // The stale node never resurfaces: d1 appears at most once, and only
        // via its new vector.
        let hits = index.search(&store, &unit(4, 0), 4, 0.0, None).unwrap();
        assert!(hits.iter().filter(|h| h.doc_id == "d1").count() <= 1);
        assert!(hits
            .iter()
            .find(|h| h.doc_id == "d1")
            .map(|h| h.similarity < 0.99)
            .unwrap_or(true));
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut p = params(4);
        p.capacity = 2;
        let index = VectorIndex::new(p);
        let store = MetadataStore::new();
        index
            .add_document(&store, "a", &unit(4, 0), "t", UserMetadata::new())
            .unwrap();
        index
            .add_document(&store, "b", &unit(4, 1), "t", UserMetadata::new())
            .unwrap();
        let err = index
            .add_document(&store, "c", &unit(4, 2), "t", UserMetadata::new())
            .unwrap_err();
        assert_eq!(err.kind(), "CAPACITY_EXCEEDED");

        // Updates still pass at capacity.
        index
            .add_document(&store, "a", &unit(4, 3), "t", UserMetadata::new())
            .unwrap();
    }

    #[test]
    fn test_threshold_elides_weak_hits() {
        let index = VectorIndex::new(params(4));
        let store = MetadataStore::new();
        index
            .add_document(&store, "near", &[1.0, 0.0, 0.0, 0.0], "t", UserMetadata::new())
            .unwrap();
        index
            .add_document(&store, "far", &[-1.0, 0.0, 0.0, 0.0], "t", UserMetadata::new())
            .unwrap();

        let hits = index
            .search(&store, &[1.0, 0.0, 0.0, 0.0], 2, 0.9, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "near");
    }

    #[test]
    fn test_deleted_documents_are_filtered_from_results() {
        let index = VectorIndex::new(params(4));
        let store = MetadataStore::new();
        for i in 0..4 {
            index
                .add_document(&store, &format!("d{}", i), &unit(4, i), "t", UserMetadata::new())
                .unwrap();
        }
        index.remove("d2");
        store.delete("d2");

        let hits = index.search(&store, &unit(4, 2), 4, 0.0, None).unwrap();
        assert!(hits.iter().all(|h| h.doc_id != "d2"));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_batch_reports_partial_success() {
        let index = VectorIndex::new(params(4));
        let store = MetadataStore::new();
        let items = vec![
            BatchItem {
                doc_id: "a".into(),
                text: "t".into(),
                embedding: unit(4, 0),
                user_metadata: UserMetadata::new(),
            },
            BatchItem {
                doc_id: "bad".into(),
                text: "t".into(),
                embedding: vec![1.0, 0.0],
                user_metadata: UserMetadata::new(),
            },
            BatchItem {
                doc_id: "c".into(),
                text: "t".into(),
                embedding: unit(4, 2),
                user_metadata: UserMetadata::new(),
            },
        ];
        let report = index.add_batch(&store, items);
        assert_eq!(report.total, 3);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].doc_id, "bad");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.baix");
        let index = VectorIndex::new(params(8));
        let store = MetadataStore::new();
        for i in 0..20 {
            let mut v = vec![0.1f32; 8];
            v[i % 8] = 1.0;
            index
                .add_document(&store, &format!("d{}", i), &v, &format!("text {}", i), UserMetadata::new())
                .unwrap();
        }
        index.save(&store, &path).unwrap();

        let restored = VectorIndex::new(params(8));
        let restored_store = MetadataStore::new();
        restored.load(&restored_store, &path).unwrap();

        assert_eq!(restored.len(), index.len());
        assert_eq!(restored.generation(), index.generation());
        for i in 0..8 {
            let q = unit(8, i);
            let a = index.search(&store, &q, 5, 0.0, None).unwrap();
            let b = restored.search(&restored_store, &q, 5, 0.0, None).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_failed_load_leaves_index_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.baix");
        std::fs::write(&path, b"garbage that is not a snapshot").unwrap();

        let index = VectorIndex::new(params(4));
        let store = MetadataStore::new();
        index
            .add_document(&store, "keep", &unit(4, 0), "t", UserMetadata::new())
            .unwrap();

        assert!(index.load(&store, &path).is_err());
        assert_eq!(index.len(), 1);
        assert!(store.has("keep"));
    }

    #[test]
    fn test_deterministic_rebuild_matches() {
        let build = || {
            let index = VectorIndex::new(params(8));
            let store = MetadataStore::new();
            for i in 0..30 {
                let mut v = vec![0.0f32; 8];
                for (j, x) in v.iter_mut().enumerate() {
                    *x = ((i * 13 + j * 7) % 23) as f32 / 23.0;
                }
                index
                    .add_document(&store, &format!("d{}", i), &v, "t", UserMetadata::new())
                    .unwrap();
            }
            (index, store)
        };
        let (a, sa) = build();
        let (b, sb) = build();
        for i in 0..8 {
            let q = unit(8, i);
            assert_eq!(
                a.search(&sa, &q, 5, 0.0, None).unwrap(),
                b.search(&sb, &q, 5, 0.0, None).unwrap()
            );
        }
    }
}
