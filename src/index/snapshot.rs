//! Binary snapshot codec for the vector index.
//!
//! Layout: a `BAIX` magic, version, space tag, dimension, node count, RNG
//! seed and draw position, generation, graph parameters, and entry point,
//! followed by each node's level, originating doc id, vector, and per-layer
//! neighbor lists. Document metadata rides in a `<path>.metadata.json`
//! sidecar. Both files are written to a `.tmp` sibling and renamed into
//! place, so a failed write never corrupts an existing snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{QaError, Result};
use crate::index::hnsw::HnswGraph;
use crate::index::space::SimilaritySpace;
use crate::types::{Document, SystemMetadata, UserMetadata};

pub const MAGIC: &[u8; 4] = b"BAIX";
pub const VERSION: u16 = 1;

const NO_ENTRY: u32 = u32::MAX;

/// Everything needed to reconstruct an index.
#[derive(Debug)]
pub(crate) struct SnapshotContents {
    pub graph: HnswGraph,
    pub node_doc: Vec<String>,
    pub generation: u64,
    pub documents: Vec<Document>,
}

#[derive(Serialize, Deserialize)]
struct SidecarEntry {
    text: String,
    #[serde(default)]
    user_metadata: UserMetadata,
    content_length: usize,
    indexed_at: i64,
}

pub(crate) fn metadata_path(path: &Path) -> PathBuf {
    sibling(path, ".metadata.json")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

/// Write `data` to `path` via a temp file and rename.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = sibling(path, ".tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn write_snapshot(
    path: &Path,
    graph: &HnswGraph,
    node_doc: &[String],
    generation: u64,
    documents: &[Document],
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(64 + graph.vectors.len() * 4);
    buf.put_slice(MAGIC);
    buf.put_u16_le(VERSION);
    buf.put_u8(graph.space.tag());
    buf.put_u32_le(graph.dimension as u32);
    buf.put_u64_le(graph.len() as u64);
    buf.put_u64_le(graph.seed);
    buf.put_u64_le(graph.draws);
    buf.put_u64_le(generation);
    buf.put_u32_le(graph.m as u32);
    buf.put_u32_le(graph.ef_construction as u32);
    buf.put_u32_le(graph.entry_point.unwrap_or(NO_ENTRY));

    for node in 0..graph.len() {
        let level = graph.levels[node];
        buf.put_u8(level);

        let doc_id = node_doc[node].as_bytes();
        buf.put_u16_le(doc_id.len() as u16);
        buf.put_slice(doc_id);

        for &x in graph.vector(node as u32) {
            buf.put_f32_le(x);
        }
        for layer in 0..=level as usize {
            let neighbors = &graph.links[node][layer];
            buf.put_u16_le(neighbors.len() as u16);
            for &nb in neighbors {
                buf.put_u32_le(nb);
            }
        }
    }
    write_atomic(path, &buf)?;

    let mut sidecar: BTreeMap<String, SidecarEntry> = BTreeMap::new();
    for doc in documents {
        sidecar.insert(
            doc.doc_id.clone(),
            SidecarEntry {
                text: doc.text.clone(),
                user_metadata: doc.user_metadata.clone(),
                content_length: doc.system_metadata.content_length,
                indexed_at: doc.system_metadata.indexed_at,
            },
        );
    }
    let json = serde_json::to_vec_pretty(&sidecar)
        .map_err(|e| QaError::Internal(format!("snapshot metadata encode failed: {}", e)))?;
    write_atomic(&metadata_path(path), &json)?;
    Ok(())
}

fn need(buf: &impl Buf, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(QaError::SnapshotIncompatible(format!(
            "truncated snapshot while reading {}",
            what
        )));
    }
    Ok(())
}

pub(crate) fn read_snapshot(path: &Path, expected_dimension: usize) -> Result<SnapshotContents> {
    let raw = std::fs::read(path)?;
    let mut buf = &raw[..];

    need(&buf, 4 + 2 + 1 + 4 + 8, "header")?;
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if &magic != MAGIC {
        return Err(QaError::SnapshotIncompatible("bad magic".into()));
    }
    let version = buf.get_u16_le();
    if version != VERSION {
        return Err(QaError::SnapshotIncompatible(format!(
            "unsupported snapshot version {}",
            version
        )));
    }
    let space = SimilaritySpace::from_tag(buf.get_u8())
        .ok_or_else(|| QaError::SnapshotIncompatible("unknown space tag".into()))?;
    let dimension = buf.get_u32_le() as usize;
    if dimension != expected_dimension {
        return Err(QaError::SnapshotIncompatible(format!(
            "dimension mismatch: snapshot has {}, index expects {}",
            dimension, expected_dimension
        )));
    }

    need(&buf, 8 * 4 + 4 + 4 + 4, "header")?;
    let count = buf.get_u64_le() as usize;
    let seed = buf.get_u64_le();
    let draws = buf.get_u64_le();
    let generation = buf.get_u64_le();
    let m = buf.get_u32_le() as usize;
    let ef_construction = buf.get_u32_le() as usize;
    let entry_raw = buf.get_u32_le();
    let entry_point = (entry_raw != NO_ENTRY).then_some(entry_raw);

    let mut vectors: Vec<f32> = Vec::with_capacity(count * dimension);
    let mut levels: Vec<u8> = Vec::with_capacity(count);
    let mut links: Vec<Vec<Vec<u32>>> = Vec::with_capacity(count);
    let mut node_doc: Vec<String> = Vec::with_capacity(count);

    for node in 0..count {
        need(&buf, 1 + 2, "node header")?;
        let level = buf.get_u8();
        let id_len = buf.get_u16_le() as usize;
        need(&buf, id_len, "doc id")?;
        let mut id_bytes = vec![0u8; id_len];
        buf.copy_to_slice(&mut id_bytes);
        let doc_id = String::from_utf8(id_bytes).map_err(|_| {
            QaError::SnapshotIncompatible(format!("node {} has a non-UTF-8 doc id", node))
        })?;

        need(&buf, dimension * 4, "vector")?;
        for _ in 0..dimension {
            vectors.push(buf.get_f32_le());
        }

        let mut node_links = Vec::with_capacity(level as usize + 1);
        for _ in 0..=level {
            need(&buf, 2, "neighbor count")?;
            let n = buf.get_u16_le() as usize;
            need(&buf, n * 4, "neighbors")?;
            let mut neighbors = Vec::with_capacity(n);
            for _ in 0..n {
                neighbors.push(buf.get_u32_le());
            }
            node_links.push(neighbors);
        }

        levels.push(level);
        links.push(node_links);
        node_doc.push(doc_id);
    }

    if let Some(ep) = entry_point {
        if ep as usize >= count {
            return Err(QaError::SnapshotIncompatible(
                "entry point out of range".into(),
            ));
        }
    }

    let sidecar_raw = std::fs::read(metadata_path(path))?;
    let sidecar: BTreeMap<String, SidecarEntry> = serde_json::from_slice(&sidecar_raw)
        .map_err(|e| QaError::SnapshotIncompatible(format!("bad metadata sidecar: {}", e)))?;
    let documents = sidecar
        .into_iter()
        .map(|(doc_id, e)| Document {
            doc_id,
            text: e.text,
            user_metadata: e.user_metadata,
            system_metadata: SystemMetadata {
                content_length: e.content_length,
                indexed_at: e.indexed_at,
            },
        })
        .collect();

    let graph = HnswGraph::from_parts(
        dimension,
        space,
        m,
        ef_construction,
        seed,
        draws,
        vectors,
        levels,
        links,
        entry_point,
    );
    Ok(SnapshotContents {
        graph,
        node_doc,
        generation,
        documents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> (HnswGraph, Vec<String>) {
        let mut g = HnswGraph::new(4, SimilaritySpace::Cosine, 4, 16, 99);
        let mut node_doc = Vec::new();
        for i in 0..6u32 {
            let mut v = vec![0.0f32; 4];
            v[(i % 4) as usize] = 1.0;
            v[((i + 1) % 4) as usize] = 0.5;
            g.insert(&v).unwrap();
            node_doc.push(format!("doc-{}", i));
        }
        (g, node_doc)
    }

    fn sample_docs(node_doc: &[String]) -> Vec<Document> {
        node_doc
            .iter()
            .map(|id| Document {
                doc_id: id.clone(),
                text: format!("text of {}", id),
                user_metadata: UserMetadata::new(),
                system_metadata: SystemMetadata {
                    content_length: 10,
                    indexed_at: 1_700_000_000,
                },
            })
            .collect()
    }

    #[test]
    fn test_roundtrip_preserves_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.baix");
        let (graph, node_doc) = sample_graph();
        let docs = sample_docs(&node_doc);

        write_snapshot(&path, &graph, &node_doc, 6, &docs).unwrap();
        let loaded = read_snapshot(&path, 4).unwrap();

        assert_eq!(loaded.generation, 6);
        assert_eq!(loaded.node_doc, node_doc);
        assert_eq!(loaded.graph.levels, graph.levels);
        assert_eq!(loaded.graph.links, graph.links);
        assert_eq!(loaded.graph.vectors, graph.vectors);
        assert_eq!(loaded.graph.entry_point, graph.entry_point);
        assert_eq!(loaded.documents.len(), docs.len());
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.baix");
        let (graph, node_doc) = sample_graph();
        write_snapshot(&path, &graph, &node_doc, 1, &sample_docs(&node_doc)).unwrap();

        let err = read_snapshot(&path, 8).unwrap_err();
        assert_eq!(err.kind(), "SNAPSHOT_INCOMPATIBLE");
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.baix");
        std::fs::write(&path, b"NOPExxxxxxxxxxxxxxxxxxxx").unwrap();
        let err = read_snapshot(&path, 4).unwrap_err();
        assert_eq!(err.kind(), "SNAPSHOT_INCOMPATIBLE");
    }

    #[test]
    fn test_truncated_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.baix");
        let (graph, node_doc) = sample_graph();
        write_snapshot(&path, &graph, &node_doc, 1, &sample_docs(&node_doc)).unwrap();

        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() / 2]).unwrap();
        let err = read_snapshot(&path, 4).unwrap_err();
        assert_eq!(err.kind(), "SNAPSHOT_INCOMPATIBLE");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_snapshot(&dir.path().join("absent"), 4).unwrap_err();
        assert_eq!(err.kind(), "SNAPSHOT_IO");
    }
}
