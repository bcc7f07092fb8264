//! Vector utilities and the offline hashing embedder.
//!
//! Concrete network-backed embedding providers (OpenAI) live in the
//! `business-assistant` app crate; this module only holds the pure math
//! they share with the index.

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic bag-of-words embedding via signed feature hashing.
///
/// Text is lowercased and split into alphanumeric tokens; each token is
/// hashed (FNV-1a) into one of `dims` buckets with a sign taken from a
/// higher hash bit. The result is L2-normalized, so two texts sharing
/// vocabulary have positive cosine similarity and unrelated texts sit near
/// zero. Text with no tokens maps to the zero vector.
///
/// ```rust
/// use business_assistant_core::embedding::{cosine_similarity, hash_embed};
///
/// let a = hash_embed("refund policy for returns", 256);
/// let b = hash_embed("what is the refund policy?", 256);
/// let c = hash_embed("weather forecast in Paris", 256);
/// assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
/// ```
pub fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    if dims == 0 {
        return v;
    }

    let lowered = text.to_lowercase();
    for token in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let h = fnv1a(token.as_bytes());
        let bucket = (h % dims as u64) as usize;
        let sign = if (h >> 63) & 1 == 1 { -1.0 } else { 1.0 };
        v[bucket] += sign;
    }

    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}
