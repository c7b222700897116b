use dashmap::DashMap;

use crate::types::{Document, SystemMetadata, UserMetadata};

/// Concurrent `doc_id → Document` store. Readers are lock-free; writers take
/// a shard-exclusive lock. System metadata is filled in here; user metadata
/// passes through untouched.
///
/// Deletes remove only this record. The ANN graph keeps its node, and
/// searches filter stale nodes by consulting this store.
#[derive(Debug, Default)]
pub struct MetadataStore {
    docs: DashMap<String, Document>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document, stamping system metadata.
    pub fn put(&self, doc_id: &str, text: String, user_metadata: UserMetadata) {
        let doc = Document {
            doc_id: doc_id.to_string(),
            system_metadata: SystemMetadata {
                content_length: text.len(),
                indexed_at: chrono::Utc::now().timestamp(),
            },
            text,
            user_metadata,
        };
        self.docs.insert(doc_id.to_string(), doc);
    }

    /// Insert a fully-formed record, preserving its timestamps. Used by
    /// snapshot load.
    pub fn put_record(&self, doc: Document) {
        self.docs.insert(doc.doc_id.clone(), doc);
    }

    pub fn get(&self, doc_id: &str) -> Option<Document> {
        self.docs.get(doc_id).map(|d| d.value().clone())
    }

    pub fn has(&self, doc_id: &str) -> bool {
        self.docs.contains_key(doc_id)
    }

    pub fn delete(&self, doc_id: &str) -> bool {
        self.docs.remove(doc_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn clear(&self) {
        self.docs.clear();
    }

    /// Snapshot of all current records.
    pub fn all(&self) -> Vec<Document> {
        self.docs.iter().map(|e| e.value().clone()).collect()
    }
}
