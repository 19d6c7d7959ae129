use lazy_static::lazy_static;
use regex::Regex;
use strsim::jaro_winkler;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("static regex");
}

/// Fuzzy matcher for business terms with spelling and plural variations
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    /// Similarity threshold (0.0-1.0) for considering two terms a match
    pub similarity_threshold: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.9,
        }
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
        }
    }

    /// Lowercase, strip punctuation, collapse whitespace and turn `_` into spaces.
    pub fn normalize_term(s: &str) -> String {
        let cleaned: String = s
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == '-' { ' ' } else { c })
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();
        WHITESPACE.replace_all(cleaned.trim(), " ").to_string()
    }

    /// Naive singular form: "countries" -> "country", "deposits" -> "deposit".
    pub fn singularize(word: &str) -> String {
        if word.len() > 4 && word.ends_with("ies") {
            format!("{}y", &word[..word.len() - 3])
        } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
            word[..word.len() - 1].to_string()
        } else {
            word.to_string()
        }
    }

    /// Similarity in [0,1] between two terms after normalization
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let a = Self::normalize_term(a);
        let b = Self::normalize_term(b);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b || Self::singularize(&a) == Self::singularize(&b) {
            return 1.0;
        }

        let jw = jaro_winkler(&a, &b);

        // Small bonus when one term contains the other ("deposit" vs "deposit amount")
        let bonus = if a.contains(&b) || b.contains(&a) {
            let len_diff = (a.len() as f64 - b.len() as f64).abs();
            let max_len = a.len().max(b.len()) as f64;
            (1.0 - len_diff / max_len) * 0.1
        } else {
            0.0
        };

        (jw + bonus).min(1.0)
    }

    pub fn is_match(&self, a: &str, b: &str) -> bool {
        self.similarity(a, b) >= self.similarity_threshold
    }

    /// Best candidate at or above the threshold. Ties keep the earlier candidate.
    pub fn find_best_match<'a, I>(&self, target: &str, candidates: I) -> Option<(&'a str, f64)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<(&'a str, f64)> = None;
        for candidate in candidates {
            let score = self.similarity(target, candidate);
            if score < self.similarity_threshold {
                continue;
            }
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((candidate, score)),
            }
        }
        best
    }
}
