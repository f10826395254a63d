use crate::dump::{DumpOptions, DumpReader};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::SystemTime;
use tracing::{info, warn};

const CENSUS_VERSION: u32 = 1;

/// Expected article count for progress reporting, cached next to the
/// outputs and validated against the dump's identity so a stale census is
/// recomputed instead of trusted.
#[derive(Serialize, Deserialize)]
pub struct Census {
    pub version: u32,
    pub input_path: String,
    pub input_mtime: u64,
    pub input_size: u64,
    pub article_count: u64,
}

fn input_metadata(input_path: &Path) -> Result<(u64, u64)> {
    let metadata = fs::metadata(input_path)
        .with_context(|| format!("Failed to get metadata for: {:?}", input_path))?;
    let mtime = metadata
        .modified()
        .context("Failed to get modification time")?
        .duration_since(SystemTime::UNIX_EPOCH)
        .context("Invalid modification time")?
        .as_secs();
    Ok((mtime, metadata.len()))
}

/// Returns the cached count when the census matches the dump, else None.
pub fn try_load(census_path: &Path, input_path: &Path) -> Result<Option<u64>> {
    if !census_path.exists() {
        return Ok(None);
    }
    let file = File::open(census_path).context("Failed to open census file")?;
    let census: Census = match serde_json::from_reader(BufReader::new(file)) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Census file is corrupt or unreadable");
            return Ok(None);
        }
    };

    if census.version != CENSUS_VERSION {
        info!(
            cached = census.version,
            current = CENSUS_VERSION,
            "Census version mismatch"
        );
        return Ok(None);
    }
    if census.input_path != input_path.to_string_lossy() {
        info!("Census input path mismatch");
        return Ok(None);
    }
    let (mtime, size) = input_metadata(input_path)?;
    if census.input_mtime != mtime || census.input_size != size {
        info!("Dump has changed since the census was taken");
        return Ok(None);
    }

    Ok(Some(census.article_count))
}

/// Writes the census atomically via rename.
pub fn save(census_path: &Path, input_path: &Path, article_count: u64) -> Result<()> {
    if let Some(parent) = census_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    let (mtime, size) = input_metadata(input_path)?;
    let census = Census {
        version: CENSUS_VERSION,
        input_path: input_path.to_string_lossy().into_owned(),
        input_mtime: mtime,
        input_size: size,
        article_count,
    };

    let tmp_path = census_path.with_extension("json.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp census file: {:?}", tmp_path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &census)
        .context("Failed to serialize census")?;
    fs::rename(&tmp_path, census_path)
        .with_context(|| format!("Failed to rename census into place: {:?}", census_path))?;

    info!(articles = article_count, "Census saved");
    Ok(())
}

/// Counting pass over the dump with the default article filters.
pub fn count_articles(input_path: &Path, limit: u64) -> Result<u64> {
    let options = DumpOptions {
        limit,
        ..Default::default()
    };
    let mut count = 0u64;
    for record in DumpReader::open(input_path, options)? {
        record?;
        count += 1;
    }
    Ok(count)
}

/// Cached count when fresh, else a counting pass followed by a save.
pub fn expected_articles(census_path: &Path, input_path: &Path, limit: u64) -> Result<u64> {
    if let Some(count) = try_load(census_path, input_path)? {
        info!(articles = count, "Census loaded");
        return Ok(count);
    }
    info!("Taking census of the dump");
    let count = count_articles(input_path, limit)?;
    save(census_path, input_path, count)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_dump(dir: &TempDir, pages: usize) -> std::path::PathBuf {
        let path = dir.path().join("dump.xml");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "<mediawiki>").unwrap();
        for i in 0..pages {
            writeln!(
                file,
                "<page>\n<title>Article{}</title>\n<text>body</text>\n</page>",
                i
            )
            .unwrap();
        }
        writeln!(file, "</mediawiki>").unwrap();
        path
    }

    #[test]
    fn counting_pass_counts_accepted_pages() {
        let dir = TempDir::new().unwrap();
        let dump = write_dump(&dir, 5);
        assert_eq!(count_articles(&dump, 0).unwrap(), 5);
        assert_eq!(count_articles(&dump, 3).unwrap(), 3);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let dump = write_dump(&dir, 2);
        let census_path = dir.path().join("census.json");

        save(&census_path, &dump, 42).unwrap();
        assert_eq!(try_load(&census_path, &dump).unwrap(), Some(42));
    }

    #[test]
    fn missing_census_is_none() {
        let dir = TempDir::new().unwrap();
        let dump = write_dump(&dir, 1);
        assert_eq!(
            try_load(&dir.path().join("nope.json"), &dump).unwrap(),
            None
        );
    }

    #[test]
    fn stale_census_rejected_after_dump_change() {
        let dir = TempDir::new().unwrap();
        let dump = write_dump(&dir, 2);
        let census_path = dir.path().join("census.json");
        save(&census_path, &dump, 2).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut file = File::create(&dump).unwrap();
        writeln!(file, "<mediawiki>replaced with something longer</mediawiki>").unwrap();

        assert_eq!(try_load(&census_path, &dump).unwrap(), None);
    }

    #[test]
    fn corrupt_census_rejected() {
        let dir = TempDir::new().unwrap();
        let dump = write_dump(&dir, 1);
        let census_path = dir.path().join("census.json");
        let mut file = File::create(&census_path).unwrap();
        file.write_all(b"not json at all").unwrap();

        assert_eq!(try_load(&census_path, &dump).unwrap(), None);
    }

    #[test]
    fn expected_articles_computes_and_caches() {
        let dir = TempDir::new().unwrap();
        let dump = write_dump(&dir, 4);
        let census_path = dir.path().join("census.json");

        assert_eq!(expected_articles(&census_path, &dump, 0).unwrap(), 4);
        assert!(census_path.exists());
        assert_eq!(expected_articles(&census_path, &dump, 0).unwrap(), 4);
    }
}
