use crate::codec;
use anyhow::{bail, Context, Result};
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::info;

/// Accumulates the term vocabulary over a single pass of the corpus. Term
/// ids start at 1 and are assigned in arrival order; document frequency
/// counts each containing article once. Workers count term frequencies
/// thread-locally and call [`add_document`] once per article.
///
/// [`add_document`]: DictionaryBuilder::add_document
pub struct DictionaryBuilder {
    ids: FxHashMap<String, u32>,
    words: Vec<String>,
    dfs: Vec<u32>,
    total_documents: u32,
    total_words: u64,
}

impl DictionaryBuilder {
    pub fn new() -> Self {
        DictionaryBuilder {
            ids: FxHashMap::default(),
            words: Vec::new(),
            dfs: Vec::new(),
            total_documents: 0,
            total_words: 0,
        }
    }

    /// `distinct_terms` must be the article's unique tokens; `word_count`
    /// its total token count.
    pub fn add_document<'a>(
        &mut self,
        distinct_terms: impl Iterator<Item = &'a str>,
        word_count: u64,
    ) {
        self.total_documents += 1;
        self.total_words += word_count;
        for term in distinct_terms {
            match self.ids.get(term) {
                Some(&id) => self.dfs[(id - 1) as usize] += 1,
                None => {
                    let id = self.words.len() as u32 + 1;
                    self.ids.insert(term.to_string(), id);
                    self.words.push(term.to_string());
                    self.dfs.push(1);
                }
            }
        }
    }

    pub fn finish(self) -> Dictionary {
        info!(
            terms = self.words.len(),
            documents = self.total_documents,
            words = self.total_words,
            "Dictionary finalised"
        );
        Dictionary {
            ids: self.ids,
            words: self.words,
            dfs: self.dfs,
            total_documents: self.total_documents,
            total_words: self.total_words,
        }
    }
}

impl Default for DictionaryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Finalised vocabulary view: term <-> id plus idf scoring.
pub struct Dictionary {
    ids: FxHashMap<String, u32>,
    words: Vec<String>,
    dfs: Vec<u32>,
    total_documents: u32,
    total_words: u64,
}

impl Dictionary {
    pub fn id_of(&self, term: &str) -> Option<u32> {
        self.ids.get(term).copied()
    }

    pub fn word_of(&self, id: u32) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.words.get((id - 1) as usize).map(String::as_str)
    }

    pub fn df(&self, id: u32) -> Option<u32> {
        if id == 0 {
            return None;
        }
        self.dfs.get((id - 1) as usize).copied()
    }

    /// log10(N/df); for an unknown id, log10(N) (df treated as 1).
    pub fn log_idf(&self, id: u32) -> f32 {
        let n = self.total_documents as f64;
        match self.df(id) {
            Some(df) if df > 0 => (n / df as f64).log10() as f32,
            _ => n.log10() as f32,
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn total_documents(&self) -> u32 {
        self.total_documents
    }

    pub fn total_words(&self) -> u64 {
        self.total_words
    }

    /// Layout: `totalDocuments:int`, `totalWords:long`, `M:int`,
    /// `M x (string, int)`, `D:int`, `D x (int, int)`.
    pub fn save(&self, path: &Path) -> Result<()> {
        codec::write_atomic(path, |w| {
            codec::write_u32(w, self.total_documents)?;
            codec::write_u64(w, self.total_words)?;
            codec::write_u32(w, self.words.len() as u32)?;
            for (i, word) in self.words.iter().enumerate() {
                codec::write_str(w, word)?;
                codec::write_u32(w, i as u32 + 1)?;
            }
            codec::write_u32(w, self.dfs.len() as u32)?;
            for (i, df) in self.dfs.iter().enumerate() {
                codec::write_u32(w, i as u32 + 1)?;
                codec::write_u32(w, *df)?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to save dictionary: {:?}", path))?;
        info!(terms = self.words.len(), path = ?path, "Dictionary saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = codec::open_reader(path)?;
        let total_documents = codec::read_u32(&mut r)?;
        let total_words = codec::read_u64(&mut r)?;

        let m = codec::checked_len(codec::read_u32(&mut r)?, 8)?;
        let mut ids = FxHashMap::with_capacity_and_hasher(m, Default::default());
        let mut words = vec![String::new(); m];
        for _ in 0..m {
            let word = codec::read_str(&mut r)?;
            let id = codec::read_u32(&mut r)?;
            if id == 0 || id as usize > m {
                bail!("dictionary id {} out of range (M = {}): {:?}", id, m, path);
            }
            words[(id - 1) as usize] = word.clone();
            ids.insert(word, id);
        }

        let d = codec::checked_len(codec::read_u32(&mut r)?, 8)?;
        if d != m {
            bail!("dictionary df table length {} does not match M = {}", d, m);
        }
        let mut dfs = vec![0u32; d];
        for _ in 0..d {
            let id = codec::read_u32(&mut r)?;
            let df = codec::read_u32(&mut r)?;
            if id == 0 || id as usize > d {
                bail!("dictionary df id {} out of range: {:?}", id, path);
            }
            dfs[(id - 1) as usize] = df;
        }

        Ok(Dictionary {
            ids,
            words,
            dfs,
            total_documents,
            total_words,
        })
    }
}
