use crate::vectors::SparseVector;

/// Component weights for the combined similarity; must sum to 1. A zero
/// weight switches its component off entirely.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub text: f32,
    pub locations: f32,
    pub categories: f32,
}

impl Weights {
    pub fn new(text: f32, locations: f32, categories: f32) -> Self {
        Weights {
            text,
            locations,
            categories,
        }
    }

    pub fn sum(&self) -> f32 {
        self.text + self.locations + self.categories
    }

    pub fn is_normalised(&self) -> bool {
        (self.sum() - 1.0).abs() <= 1e-6
    }
}

/// Dot product of two id-sorted sparse vectors; equals cosine similarity
/// when both are L2-normalised.
pub fn sorted_cosine(a: &SparseVector, b: &SparseVector) -> f32 {
    let mut sum = 0.0;
    let mut i = 0;
    let mut j = 0;
    while i < a.ids.len() && j < b.ids.len() {
        match a.ids[i].cmp(&b.ids[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a.scores[i] * b.scores[j];
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

/// Intersection size of two ascending id arrays.
pub fn intersection_count(a: &[u32], b: &[u32]) -> u32 {
    let mut count = 0;
    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                count += 1;
                i += 1;
                j += 1;
            }
        }
    }
    count
}

/// Jaccard from the intersection: |A n B| / (|A| + |B| - |A n B|).
pub fn jaccard(a: &[u32], b: &[u32]) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let i = intersection_count(a, b) as f32;
    let union = a.len() as f32 + b.len() as f32 - i;
    if union == 0.0 {
        0.0
    } else {
        i / union
    }
}

/// Inputs for one side of the combined score.
pub struct ScoredArticle<'a> {
    pub tfidf: &'a SparseVector,
    pub locations: &'a SparseVector,
    pub categories: &'a [u32],
}

/// Weighted sum of text cosine, named-location cosine and category Jaccard.
/// Components with zero weight are never computed.
pub fn combined_score(a: &ScoredArticle, b: &ScoredArticle, weights: &Weights) -> f32 {
    let mut score = 0.0;
    if weights.text > 0.0 {
        score += weights.text * sorted_cosine(a.tfidf, b.tfidf);
    }
    if weights.locations > 0.0 {
        score += weights.locations * sorted_cosine(a.locations, b.locations);
    }
    if weights.categories > 0.0 {
        score += weights.categories * jaccard(a.categories, b.categories);
    }
    score
}
