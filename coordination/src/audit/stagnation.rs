//! Similarity-based stagnation detection: if a window of recent submissions
//! are all near-identical to each other, the engine should stop looping
//! rather than keep paying for audits that will never move the score (C5).

use std::collections::HashSet;

/// Character-trigram Jaccard similarity, in `[0.0, 1.0]`. Cheap and
/// order-insensitive -- catches reordered-but-unchanged submissions that a
/// pure edit-distance metric would score as dissimilar.
fn trigram_jaccard(a: &str, b: &str) -> f64 {
    let trigrams = |s: &str| -> HashSet<[char; 3]> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() < 3 {
            return HashSet::new();
        }
        chars.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
    };
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

/// Combined similarity: the average of trigram Jaccard and normalized
/// Levenshtein similarity. Jaccard alone is blind to pure insertions;
/// edit-distance alone is blind to reordering, so averaging covers both.
pub fn similarity(a: &str, b: &str) -> f64 {
    let jaccard = trigram_jaccard(a, b);
    let levenshtein = strsim::normalized_levenshtein(a, b);
    (jaccard + levenshtein) / 2.0
}

/// Sliding-window detector over a session's recent normalized submissions.
pub struct StagnationDetector {
    threshold: f64,
    start_loop: u32,
    window: usize,
}

impl StagnationDetector {
    pub fn new(threshold: f64, start_loop: u32, window: usize) -> Self {
        Self {
            threshold,
            start_loop,
            window,
        }
    }

    /// Evaluate whether the last `window` normalized submissions (most
    /// recent last) are stagnant: every consecutive pair's similarity meets
    /// the configured threshold. Never fires before `start_loop`, and never
    /// fires with fewer than `window` submissions available.
    ///
    /// Returns the minimum pairwise similarity observed in the window when
    /// stagnation fires, for inclusion in `StagnationInfo`.
    pub fn evaluate(&self, current_loop: u32, recent_normalized: &[String]) -> Option<f64> {
        if current_loop < self.start_loop {
            return None;
        }
        if recent_normalized.len() < self.window {
            return None;
        }
        let tail = &recent_normalized[recent_normalized.len() - self.window..];
        let mut min_similarity = 1.0f64;
        for pair in tail.windows(2) {
            let s = similarity(&pair[0], &pair[1]);
            min_similarity = min_similarity.min(s);
            if s < self.threshold {
                return None;
            }
        }
        Some(min_similarity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_have_similarity_one() {
        assert_eq!(similarity("hello world", "hello world"), 1.0);
    }

    #[test]
    fn completely_different_strings_have_low_similarity() {
        let s = similarity("aaaaaaaaaa", "zzzzzzzzzz");
        assert!(s < 0.2, "expected low similarity, got {s}");
    }

    #[test]
    fn detector_does_not_fire_before_start_loop() {
        let detector = StagnationDetector::new(0.9, 10, 3);
        let samples = vec!["same".to_string(); 3];
        assert_eq!(detector.evaluate(5, &samples), None);
    }

    #[test]
    fn detector_does_not_fire_with_insufficient_history() {
        let detector = StagnationDetector::new(0.9, 1, 3);
        let samples = vec!["same".to_string(); 2];
        assert_eq!(detector.evaluate(10, &samples), None);
    }

    #[test]
    fn detector_fires_when_window_is_all_near_identical() {
        let detector = StagnationDetector::new(0.9, 1, 3);
        let samples = vec![
            "fn main() { println!(\"hi\"); }".to_string(),
            "fn main() { println!(\"hi\"); }".to_string(),
            "fn main() { println!(\"hi\"); }".to_string(),
        ];
        let result = detector.evaluate(10, &samples);
        assert!(result.is_some());
        assert!(result.unwrap() >= 0.9);
    }

    #[test]
    fn detector_does_not_fire_when_content_is_still_changing() {
        let detector = StagnationDetector::new(0.95, 1, 3);
        let samples = vec![
            "fn main() { println!(\"one\"); }".to_string(),
            "fn main() { println!(\"two\"); }".to_string(),
            "fn main() { println!(\"three\"); }".to_string(),
        ];
        assert_eq!(detector.evaluate(10, &samples), None);
    }
}
