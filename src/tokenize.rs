use rust_stemmers::{Algorithm, Stemmer};

/// Lowercasing, stopword-filtering, stemming tokenizer used by the
/// dictionary and TF-IDF builders. One instance is shared across workers;
/// stemming is stateless.
pub struct Tokenizer {
    stemmer: Stemmer,
}

impl Tokenizer {
    pub fn new() -> Self {
        Tokenizer {
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Splits on non-alphanumeric boundaries, lowercases, drops stopwords
    /// and single-character tokens, then applies the Snowball stem.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        for ch in text.chars() {
            if ch.is_alphanumeric() {
                for lower in ch.to_lowercase() {
                    current.push(lower);
                }
            } else if !current.is_empty() {
                self.push_token(&mut tokens, &current);
                current.clear();
            }
        }
        if !current.is_empty() {
            self.push_token(&mut tokens, &current);
        }
        tokens
    }

    fn push_token(&self, tokens: &mut Vec<String>, word: &str) {
        if word.len() < 2 || is_stopword(word) {
            return;
        }
        tokens.push(self.stemmer.stem(word).into_owned());
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn is_stopword(word: &str) -> bool {
    matches!(
        word,
        "a" | "an" | "the" | "is" | "it" | "its" | "of" | "to" | "in" | "for" | "on"
        | "with" | "at" | "by" | "from" | "as" | "or" | "and" | "but" | "not" | "be"
        | "are" | "was" | "were" | "been" | "being" | "have" | "has" | "had" | "do"
        | "does" | "did" | "will" | "would" | "could" | "should" | "may" | "might"
        | "shall" | "can" | "this" | "that" | "these" | "those" | "there" | "here"
        | "where" | "when" | "what" | "which" | "who" | "whom" | "how" | "all" | "each"
        | "every" | "both" | "few" | "more" | "most" | "other" | "some" | "such" | "no"
        | "nor" | "only" | "own" | "same" | "so" | "than" | "too" | "very" | "just"
        | "because" | "about" | "into" | "through" | "during" | "before" | "after"
        | "above" | "below" | "between" | "under" | "over" | "again" | "further"
        | "then" | "once" | "any" | "also" | "he" | "she" | "they" | "them" | "their"
        | "his" | "her" | "we" | "us" | "our" | "you" | "your" | "i" | "my" | "me"
        | "if" | "up" | "out" | "down" | "off" | "while" | "until" | "against"
    )
}
