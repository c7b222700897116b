use serde::{Deserialize, Serialize};

/// Similarity space of a vector index, fixed at construction and recorded in
/// the snapshot header.
///
/// Whatever the internal space, search surfaces a normalized similarity in
/// `[0, 1]`: inner-product and cosine map through `(s + 1) / 2` (unit
/// vectors assumed for inner-product), L2 maps through `1 / (1 + d)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimilaritySpace {
    InnerProduct,
    Cosine,
    L2,
}

impl SimilaritySpace {
    /// Snapshot tag byte.
    pub fn tag(&self) -> u8 {
        match self {
            Self::InnerProduct => 0,
            Self::Cosine => 1,
            Self::L2 => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::InnerProduct),
            1 => Some(Self::Cosine),
            2 => Some(Self::L2),
            _ => None,
        }
    }

    /// Normalized similarity in `[0, 1]`; higher is closer.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        let s = match self {
            Self::InnerProduct => (dot(a, b) + 1.0) / 2.0,
            Self::Cosine => (cosine(a, b) + 1.0) / 2.0,
            Self::L2 => 1.0 / (1.0 + euclidean(a, b)),
        };
        s.clamp(0.0, 1.0)
    }

    /// Graph-internal distance; lower is closer. Monotone inverse of
    /// `similarity`, so orderings agree across spaces.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        1.0 - self.similarity(a, b)
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom <= f32::EPSILON {
        return 0.0;
    }
    dot(a, b) / denom
}

pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// L2-normalize in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let n = norm(v);
    if n > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= n;
        }
    }
}
