//! Deterministic text embeddings shared by the retrieval safety layer and
//! knowledge search. Feature hashing over lowercase ASCII tokens, L2
//! normalised, so cosine similarity is stable across processes.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

pub const DEFAULT_DIMENSIONS: usize = 256;

/// Collapse whitespace and lowercase.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_lowercase()
}

pub fn tokenize_ascii(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '\'' {
            if ch != '\'' {
                current.push(ch.to_ascii_lowercase());
            }
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

pub fn hashing_embedding(text: &str, dimensions: usize) -> Vec<f64> {
    let mut vec = vec![0.0_f64; dimensions];
    if dimensions == 0 {
        return vec;
    }

    let tokens = tokenize_ascii(text);
    if tokens.is_empty() {
        return vec;
    }

    let mut counts: HashMap<String, u32> = HashMap::new();
    for token in tokens {
        *counts.entry(token).or_insert(0) += 1;
    }

    for (token, count) in counts {
        let digest = Sha256::digest(token.as_bytes());
        let bucket =
            u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize % dimensions;
        let sign = if digest[4] % 2 == 0 { 1.0 } else { -1.0 };
        vec[bucket] += sign * f64::from(count);
    }

    let norm = vec.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for value in &mut vec {
            *value /= norm;
        }
    }

    vec
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Share of distinct query tokens that also appear in `text`.
pub fn keyword_overlap(query: &str, text: &str) -> f64 {
    let query_tokens: HashSet<String> = tokenize_ascii(query).into_iter().collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens: HashSet<String> = tokenize_ascii(text).into_iter().collect();
    let hits = query_tokens
        .iter()
        .filter(|token| text_tokens.contains(*token))
        .count();
    hits as f64 / query_tokens.len() as f64
}

pub fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_whitespace_and_lowercases() {
        assert_eq!(normalize_text("  I   Feel\tOK "), "i feel ok");
    }

    #[test]
    fn tokenizer_drops_apostrophes_inside_words() {
        assert_eq!(tokenize_ascii("I can't sleep"), vec!["i", "cant", "sleep"]);
    }

    #[test]
    fn hashing_embedding_is_deterministic_and_normalized() {
        let a = hashing_embedding("breathing exercise", 64);
        let b = hashing_embedding("breathing exercise", 64);
        assert_eq!(a, b);

        let norm = a.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn identical_texts_have_unit_similarity() {
        let a = hashing_embedding("walk after dinner", DEFAULT_DIMENSIONS);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mismatched_dimensions_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn keyword_overlap_counts_distinct_tokens() {
        assert_eq!(keyword_overlap("sleep sleep hygiene", "better sleep tonight"), 0.5);
        assert_eq!(keyword_overlap("", "anything"), 0.0);
    }
}
