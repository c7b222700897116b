//! Seeded incremental HNSW graph.
//!
//! Implements the insertion and layered greedy-search algorithm from Malkov &
//! Yashunin (2016). Vectors are stored in a structure-of-arrays layout for
//! cache locality. Layer assignment draws exactly one value from a seeded RNG
//! per insert, and every candidate ordering tie-breaks on the lower node id,
//! so two graphs built from the same insert sequence with the same seed are
//! identical.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::deadline::Deadline;
use crate::error::Result;
use crate::index::space::SimilaritySpace;

/// Layer assignments never exceed this.
const MAX_LEVEL: i64 = 32;

#[derive(Debug)]
pub struct HnswGraph {
    pub(crate) dimension: usize,
    pub(crate) space: SimilaritySpace,
    pub(crate) m: usize,
    /// Base-layer link bound (2·m, per the paper).
    pub(crate) m_max0: usize,
    pub(crate) ef_construction: usize,
    /// Level normalization factor, 1/ln(m).
    ml: f64,
    rng: StdRng,
    pub(crate) seed: u64,
    /// RNG draws consumed so far; persisted so a loaded graph resumes the
    /// same deterministic stream.
    pub(crate) draws: u64,
    /// Structure-of-arrays vector storage: node `i` occupies
    /// `[i*dimension, (i+1)*dimension)`.
    pub(crate) vectors: Vec<f32>,
    /// Top layer of each node.
    pub(crate) levels: Vec<u8>,
    /// `links[node][layer]` holds that node's neighbors in that layer.
    pub(crate) links: Vec<Vec<Vec<u32>>>,
    pub(crate) entry_point: Option<u32>,
}

/// Heap entry ordered by distance, then by node id so that equal distances
/// resolve deterministically in favor of the lower id.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist: f32,
    id: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl HnswGraph {
    pub fn new(
        dimension: usize,
        space: SimilaritySpace,
        m: usize,
        ef_construction: usize,
        seed: u64,
    ) -> Self {
        Self {
            dimension,
            space,
            m,
            m_max0: m * 2,
            ef_construction,
            ml: 1.0 / (m as f64).ln(),
            rng: StdRng::seed_from_u64(seed),
            seed,
            draws: 0,
            vectors: Vec::new(),
            levels: Vec::new(),
            links: Vec::new(),
            entry_point: None,
        }
    }

    /// Reconstruct a graph from persisted parts, fast-forwarding the RNG to
    /// its saved position.
    pub(crate) fn from_parts(
        dimension: usize,
        space: SimilaritySpace,
        m: usize,
        ef_construction: usize,
        seed: u64,
        draws: u64,
        vectors: Vec<f32>,
        levels: Vec<u8>,
        links: Vec<Vec<Vec<u32>>>,
        entry_point: Option<u32>,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..draws {
            let _: f64 = rng.gen();
        }
        Self {
            dimension,
            space,
            m,
            m_max0: m * 2,
            ef_construction,
            ml: 1.0 / (m as f64).ln(),
            rng,
            seed,
            draws,
            vectors,
            levels,
            links,
            entry_point,
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub(crate) fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Insert a vector, returning its node id. The caller validates the
    /// dimension.
    pub fn insert(&mut self, vector: &[f32]) -> Result<u32> {
        debug_assert_eq!(vector.len(), self.dimension);

        let id = self.levels.len() as u32;
        let level = self.draw_level();
        self.vectors.extend_from_slice(vector);
        self.levels.push(level);
        self.links.push(vec![Vec::new(); level as usize + 1]);

        let Some(mut ep) = self.entry_point else {
            self.entry_point = Some(id);
            return Ok(id);
        };
        let ep_level = self.levels[ep as usize];

        // Greedy descent through layers above the new node's level.
        let mut lc = ep_level;
        while lc > level {
            ep = self.greedy_closest(vector, ep, lc as usize);
            lc -= 1;
        }

        // Link into each layer from min(level, ep_level) down to 0.
        let mut entries = vec![ep];
        for layer in (0..=level.min(ep_level) as usize).rev() {
            let candidates =
                self.search_layer(vector, &entries, self.ef_construction, layer, None)?;
            let max_links = if layer == 0 { self.m_max0 } else { self.m };
            let selected: Vec<u32> = candidates.iter().take(self.m).map(|c| c.id).collect();

            for &nb in &selected {
                self.links[id as usize][layer].push(nb);
                self.links[nb as usize][layer].push(id);
                if self.links[nb as usize][layer].len() > max_links {
                    self.prune_links(nb, layer, max_links);
                }
            }
            entries = candidates.iter().map(|c| c.id).collect();
        }

        if level > ep_level {
            self.entry_point = Some(id);
        }
        Ok(id)
    }

    /// Search the base layer for the `k` nearest live nodes.
    ///
    /// `keep` filters stale nodes out of the result set (they still
    /// participate in traversal, preserving graph connectivity). Returns
    /// `(node_id, similarity)` sorted by descending similarity, ties to the
    /// lower node id.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        deadline: Option<Deadline>,
        keep: &dyn Fn(u32) -> bool,
    ) -> Result<Vec<(u32, f32)>> {
        let Some(mut ep) = self.entry_point else {
            return Ok(Vec::new());
        };
        if let Some(d) = deadline {
            d.check("search")?;
        }

        for lc in (1..=self.levels[ep as usize]).rev() {
            ep = self.greedy_closest(query, ep, lc as usize);
        }

        let ef = ef.max(k);
        let candidates = self.search_layer(query, &[ep], ef, 0, deadline)?;
        Ok(candidates
            .into_iter()
            .filter(|c| keep(c.id))
            .take(k)
            .map(|c| (c.id, 1.0 - c.dist))
            .collect())
    }

    /// One draw from the exponential level distribution. Consumes exactly
    /// one RNG value so the stream position equals the insert count.
    fn draw_level(&mut self) -> u8 {
        self.draws += 1;
        let u: f64 = self.rng.gen::<f64>().max(1e-12);
        ((-u.ln() * self.ml).floor() as i64).clamp(0, MAX_LEVEL) as u8
    }

    /// Greedy hill-climb to the closest node within one layer.
    fn greedy_closest(&self, query: &[f32], mut ep: u32, layer: usize) -> u32 {
        let mut best = self.space.distance(query, self.vector(ep));
        loop {
            let mut changed = false;
            for &nb in &self.links[ep as usize][layer] {
                let d = self.space.distance(query, self.vector(nb));
                if d < best || (d == best && nb < ep) {
                    best = d;
                    ep = nb;
                    changed = true;
                }
            }
            if !changed {
                return ep;
            }
        }
    }

    /// ef-bounded best-first search within one layer. Returns candidates
    /// sorted ascending by `(distance, id)`.
    fn search_layer(
        &self,
        query: &[f32],
        entries: &[u32],
        ef: usize,
        layer: usize,
        deadline: Option<Deadline>,
    ) -> Result<Vec<Candidate>> {
        let mut visited: HashSet<u32> = HashSet::with_capacity(ef * 2);
        // Min-heap of nodes to expand, max-heap of the best ef found so far.
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut found: BinaryHeap<Candidate> = BinaryHeap::new();

        for &e in entries {
            if visited.insert(e) {
                let c = Candidate {
                    dist: self.space.distance(query, self.vector(e)),
                    id: e,
                };
                frontier.push(Reverse(c));
                found.push(c);
            }
        }

        let mut pops = 0usize;
        while let Some(Reverse(current)) = frontier.pop() {
            pops += 1;
            if pops % 64 == 0 {
                if let Some(d) = deadline {
                    d.check("search")?;
                }
            }

            let worst = found.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
            if found.len() >= ef && current.dist > worst {
                break;
            }

            for &nb in &self.links[current.id as usize][layer] {
                if !visited.insert(nb) {
                    continue;
                }
                let c = Candidate {
                    dist: self.space.distance(query, self.vector(nb)),
                    id: nb,
                };
                let worst = found.peek().map(|w| w.dist).unwrap_or(f32::INFINITY);
                if found.len() < ef || c.dist < worst {
                    frontier.push(Reverse(c));
                    found.push(c);
                    if found.len() > ef {
                        found.pop();
                    }
                }
            }
        }

        let mut out = found.into_vec();
        out.sort();
        Ok(out)
    }

    /// Trim a node's link list back to `max_links`, keeping the closest.
    fn prune_links(&mut self, node: u32, layer: usize, max_links: usize) {
        let pruned: Vec<u32> = {
            let nv = self.vector(node);
            let mut scored: Vec<Candidate> = self.links[node as usize][layer]
                .iter()
                .map(|&x| Candidate {
                    dist: self.space.distance(nv, self.vector(x)),
                    id: x,
                })
                .collect();
            scored.sort();
            scored.truncate(max_links);
            scored.into_iter().map(|c| c.id).collect()
        };
        self.links[node as usize][layer] = pruned;
    }
}
