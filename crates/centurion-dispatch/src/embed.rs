use sha2::{Digest, Sha256};

const DIMENSIONS: usize = 64;

/// Deterministic bag-of-words embedding. No embedding model is trained or
/// called; each lowercased word is hashed into one of
/// `DIMENSIONS` buckets and accumulated, giving the cosine scorer something
/// stable to compare without a real embedding model.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; DIMENSIONS];
    for word in text.split_whitespace() {
        let normalized = word.to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        let digest = Sha256::digest(normalized.as_bytes());
        let bucket = (digest[0] as usize) % DIMENSIONS;
        vector[bucket] += 1.0;
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_embeds_identically() {
        assert_eq!(embed_text("quero saber mais"), embed_text("quero saber mais"));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        assert!(embed_text("").iter().all(|v| *v == 0.0));
    }
}
