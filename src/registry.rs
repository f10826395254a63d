use crate::codec;
use anyhow::{bail, Context, Result};
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Bijective string <-> dense-id mapping, ids assigned from 0 in insertion
/// order. Used for both article titles and category names (independent id
/// spaces). Once persisted the assignment is stable; new strings extend the
/// range.
pub struct IdRegistry {
    ids: FxHashMap<String, u32>,
    names: Vec<String>,
}

impl IdRegistry {
    pub fn new() -> Self {
        IdRegistry {
            ids: FxHashMap::default(),
            names: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        IdRegistry {
            ids: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            names: Vec::with_capacity(capacity),
        }
    }

    /// Returns the existing id or assigns the next dense one.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.ids.insert(name.to_string(), id);
        self.names.push(name.to_string());
        id
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Layout: `N:int`, then `N x (string, int)` in id order.
    pub fn save(&self, path: &Path) -> Result<()> {
        codec::write_atomic(path, |w| {
            codec::write_u32(w, self.names.len() as u32)?;
            for (id, name) in self.names.iter().enumerate() {
                codec::write_str(w, name)?;
                codec::write_u32(w, id as u32)?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to save registry: {:?}", path))?;
        info!(entries = self.names.len(), path = ?path, "Registry saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = codec::open_reader(path)?;
        let n = codec::checked_len(codec::read_u32(&mut r)?, 8)?;
        let mut names = vec![String::new(); n];
        let mut ids =
            FxHashMap::with_capacity_and_hasher(n, Default::default());
        for _ in 0..n {
            let name = codec::read_str(&mut r)?;
            let id = codec::read_u32(&mut r)?;
            if id as usize >= n {
                bail!("registry id {} out of range (N = {}): {:?}", id, n, path);
            }
            ids.insert(name.clone(), id);
            names[id as usize] = name;
        }
        if ids.len() != n {
            bail!("registry contains duplicate names: {:?}", path);
        }
        info!(entries = n, path = ?path, "Registry loaded");
        Ok(IdRegistry { ids, names })
    }
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry shared across extraction workers; one lock per intern call.
pub struct SharedRegistry {
    inner: Mutex<IdRegistry>,
}

impl SharedRegistry {
    pub fn new(registry: IdRegistry) -> Self {
        SharedRegistry {
            inner: Mutex::new(registry),
        }
    }

    pub fn intern(&self, name: &str) -> u32 {
        self.inner.lock().expect("registry mutex poisoned").intern(name)
    }

    pub fn into_inner(self) -> IdRegistry {
        self.inner.into_inner().expect("registry mutex poisoned")
    }
}
