//! Deterministic feature-hashing embedder.
//!
//! The core accepts pre-computed vectors; how they were produced is outside
//! its contract. This stand-in maps text to a fixed-dimension vector by
//! hashing tokens into signed buckets, so the CLI works end to end without
//! a model download and the same text always embeds to the same vector.

use vecstream_core::similarity::l2_normalize;
use vecstream_core::StoreError;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Embed `text` under the named model profile.
pub fn embed_text(text: &str, model: &str) -> Result<Vec<f32>, StoreError> {
    let dim = dimension_for(model)?;
    let mut v = vec![0.0f32; dim];
    for token in tokens(text) {
        let h = fnv1a(token.as_bytes());
        let idx = (h % dim as u64) as usize;
        let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign;
    }
    Ok(l2_normalize(&v))
}

/// Output dimension of a model profile.
pub fn dimension_for(model: &str) -> Result<usize, StoreError> {
    match model {
        "mini" => Ok(384),
        "base" => Ok(768),
        other => Err(StoreError::InvalidParameter(format!(
            "unknown embedding model '{other}' (available: mini, base)"
        ))),
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(|c| c.to_lowercase())
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_embeds_identically() {
        let a = embed_text("the quick brown fox", "mini").unwrap();
        let b = embed_text("the quick brown fox", "mini").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
    }

    #[test]
    fn embeddings_are_unit_length() {
        let v = embed_text("hello world", "mini").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_tokens_raise_similarity() {
        let a = embed_text("rust vector database", "mini").unwrap();
        let b = embed_text("rust vector search", "mini").unwrap();
        let c = embed_text("completely unrelated words here", "mini").unwrap();
        let dot = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(a, b)| a * b).sum() };
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn unknown_model_is_rejected() {
        assert!(matches!(
            embed_text("x", "gpt-17").unwrap_err(),
            StoreError::InvalidParameter(_)
        ));
    }

    #[test]
    fn empty_text_is_a_zero_vector() {
        let v = embed_text("", "mini").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
