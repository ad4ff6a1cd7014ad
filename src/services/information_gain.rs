//! Information gain estimation for investigation planning.
//!
//! Information gain follows diminishing returns: the first agent in a domain
//! yields high gain, later ones less. When expected gain falls below the
//! threshold, stop spawning.

use std::collections::HashSet;
use tracing::debug;

use crate::domain::models::{VectorName, VectorSet};

/// Below this expected gain, spawning another agent is not worthwhile.
pub const DEFAULT_MIN_GAIN: f64 = 0.1;
/// Rounds without novel findings before an investigation is stale.
pub const DEFAULT_STALE_ROUNDS: u32 = 2;
/// Findings with novelty above this count as novel for regulation.
pub const NOVELTY_FLOOR: f64 = 0.3;

/// Shannon entropy of a probability, clamped away from log(0).
pub fn shannon_entropy(p: f64) -> f64 {
    let p = p.clamp(0.01, 0.99);
    -p * p.log2() - (1.0 - p) * (1.0 - p).log2()
}

/// Exponential-decay diminishing returns: `e^(-rate * n)`.
pub fn diminishing_returns(findings_count: u32, rate: f64) -> f64 {
    (-rate * f64::from(findings_count)).exp()
}

/// Expected information gain for continuing to investigate a domain.
///
/// Entropy of uncertainty, scaled by knowledge and context gaps, damped by
/// prior findings and dead ends.
pub fn estimate_information_gain(
    domain: &str,
    vectors: &VectorSet,
    prior_findings: u32,
    dead_ends: u32,
) -> f64 {
    let entropy = shannon_entropy(vectors.get(VectorName::Uncertainty));
    let knowledge_gap = (1.0 - vectors.get(VectorName::Know)).max(0.01);
    let context_gap = (1.0 - vectors.get(VectorName::Context)).max(0.01);

    let base_gain = entropy * (0.6 * knowledge_gap + 0.4 * context_gap);
    let dr = diminishing_returns(prior_findings, 0.3);
    let dead_end_factor = (1.0 - f64::from(dead_ends) * 0.4).max(0.05);

    let gain = (base_gain * dr * dead_end_factor).min(1.0);
    debug!(
        domain,
        base_gain, dr, dead_end_factor, gain, "information gain estimate"
    );
    gain
}

/// Whether spawning more investigation agents is worthwhile.
pub fn should_spawn_more(
    budget_remaining: u32,
    gain_estimate: f64,
    rounds_without_novel: u32,
) -> bool {
    if budget_remaining == 0 {
        debug!("stop spawning: budget exhausted");
        return false;
    }
    if rounds_without_novel >= DEFAULT_STALE_ROUNDS {
        debug!(rounds_without_novel, "stop spawning: stale investigation");
        return false;
    }
    if gain_estimate < DEFAULT_MIN_GAIN {
        debug!(gain_estimate, "stop spawning: gain below threshold");
        return false;
    }
    true
}

/// Novelty of a finding relative to existing findings: 1 − max Jaccard
/// similarity over word sets. 1.0 when nothing exists yet.
pub fn novelty_score(finding: &str, existing: &[String]) -> f64 {
    if existing.is_empty() {
        return 1.0;
    }
    let candidate = tokenize(finding);
    if candidate.is_empty() {
        return 0.0;
    }

    let mut max_similarity: f64 = 0.0;
    for text in existing {
        let words = tokenize(text);
        if words.is_empty() {
            continue;
        }
        let intersection = candidate.intersection(&words).count() as f64;
        let union = candidate.union(&words).count() as f64;
        if union > 0.0 {
            max_similarity = max_similarity.max(intersection / union);
        }
    }
    1.0 - max_similarity
}

/// Jaccard similarity between two finding texts over tokenized word sets.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a = tokenize(a);
    let set_b = tokenize(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "from", "are", "was", "were", "been", "have",
    "has", "had", "not", "but", "can", "will", "should", "would", "could", "which", "there",
    "their", "about",
];

/// Word set for Jaccard comparison: lowercase tokens of 3+ word characters,
/// minus stop words.
fn tokenize(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    let mut words = HashSet::new();
    let mut current = String::new();
    for ch in lower.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            if current.chars().count() >= 3 && !STOP_WORDS.contains(&current.as_str()) {
                words.insert(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if current.chars().count() >= 3 && !STOP_WORDS.contains(&current.as_str()) {
        words.insert(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_peaks_at_half() {
        assert!((shannon_entropy(0.5) - 1.0).abs() < 1e-9);
        assert!(shannon_entropy(0.5) > shannon_entropy(0.2));
        assert!(shannon_entropy(0.5) > shannon_entropy(0.8));
    }

    #[test]
    fn test_entropy_never_nan_at_boundaries() {
        assert!(shannon_entropy(0.0).is_finite());
        assert!(shannon_entropy(1.0).is_finite());
        assert!(shannon_entropy(0.0) > 0.0);
    }

    #[test]
    fn test_diminishing_returns_decay() {
        assert!((diminishing_returns(0, 0.3) - 1.0).abs() < 1e-9);
        assert!(diminishing_returns(1, 0.3) < 1.0);
        assert!(diminishing_returns(5, 0.3) < diminishing_returns(1, 0.3));
    }

    #[test]
    fn test_spawn_stops_on_budget() {
        assert!(!should_spawn_more(0, 0.9, 0));
        assert!(!should_spawn_more(5, 0.9, 2));
        assert!(!should_spawn_more(5, 0.05, 0));
        assert!(should_spawn_more(5, 0.5, 1));
    }

    #[test]
    fn test_novelty_of_first_finding_is_full() {
        assert_eq!(novelty_score("anything at all", &[]), 1.0);
    }

    #[test]
    fn test_novelty_of_duplicate_is_zero() {
        let existing = vec!["OAuth2 module lacks PKCE".to_string()];
        let novelty = novelty_score("OAuth2 module lacks PKCE", &existing);
        assert!(novelty < 1e-9);
    }

    #[test]
    fn test_novelty_of_unrelated_is_high() {
        let existing = vec!["OAuth2 module lacks PKCE".to_string()];
        let novelty = novelty_score("database connection pool exhausted under load", &existing);
        assert!(novelty > 0.9);
    }

    #[test]
    fn test_tokenize_drops_short_and_stop_words() {
        let words = tokenize("the auth IS a big module");
        assert!(words.contains("auth"));
        assert!(words.contains("big"));
        assert!(words.contains("module"));
        assert!(!words.contains("the"));
        assert!(!words.contains("is"));
        assert!(!words.contains("a"));
    }

    #[test]
    fn test_jaccard_similarity_bounds() {
        assert!((jaccard_similarity("alpha beta gamma", "alpha beta gamma") - 1.0).abs() < 1e-9);
        assert_eq!(jaccard_similarity("alpha beta", "delta epsilon"), 0.0);
    }
}
