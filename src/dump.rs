use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use memchr::memmem;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// One `<page>` block from the dump: the raw title-tag contents and the
/// page's interior lines (original casing, empty lines stripped). The body
/// is not parsed here; the field parsers work on it downstream.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    /// Keep `Category:` titles (the category-registry pass wants them).
    pub include_categories: bool,
    /// Yield ONLY pages carrying a `<redirect .../>` marker.
    pub redirects_only: bool,
    /// Stop after this many records; zero means unlimited.
    pub limit: u64,
}

/// Streams article records out of a Wikipedia XML dump without ever holding
/// more than one page in memory. Transparently decompresses `.bz2` input.
pub struct DumpReader {
    reader: Box<dyn BufRead + Send>,
    options: DumpOptions,
    emitted: u64,
    skipped: u64,
    line: String,
}

impl DumpReader {
    pub fn open(path: &Path, options: DumpOptions) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open dump: {:?}", path))?;
        let reader: Box<dyn BufRead + Send> =
            if path.extension().is_some_and(|e| e == "bz2") {
                Box::new(BufReader::with_capacity(256 * 1024, BzDecoder::new(file)))
            } else {
                Box::new(BufReader::with_capacity(256 * 1024, file))
            };
        Ok(DumpReader {
            reader,
            options,
            emitted: 0,
            skipped: 0,
            line: String::new(),
        })
    }

    /// Pages dropped by the title filters or as malformed.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn read_line(&mut self) -> Result<bool> {
        self.line.clear();
        let n = self
            .reader
            .read_line(&mut self.line)
            .context("I/O error while reading dump")?;
        Ok(n > 0)
    }

    /// Reads the next `<page>`..`</page>` block; None at end of stream.
    fn next_page(&mut self) -> Result<Option<(String, String, bool)>> {
        // Skip the envelope until a page opens.
        loop {
            if !self.read_line()? {
                return Ok(None);
            }
            if memmem::find(self.line.as_bytes(), b"<page>").is_some() {
                break;
            }
        }

        let mut title: Option<String> = None;
        let mut body = String::new();
        let mut is_redirect = false;
        loop {
            if !self.read_line()? {
                // Truncated page at end of stream: malformed, drop it.
                debug!("dropping truncated page at end of dump");
                self.skipped += 1;
                return Ok(None);
            }
            if memmem::find(self.line.as_bytes(), b"</page>").is_some() {
                break;
            }
            let trimmed = self.line.trim_end();
            if trimmed.trim().is_empty() {
                continue;
            }
            if title.is_none() {
                if let Some(t) = extract_title(trimmed) {
                    title = Some(t.to_string());
                }
            }
            if memmem::find(trimmed.as_bytes(), b"<redirect").is_some() {
                is_redirect = true;
            }
            body.push_str(trimmed);
            body.push('\n');
        }

        // A page without a <title> line is malformed; the caller's filter
        // drops the empty sentinel and counts it.
        Ok(Some((title.unwrap_or_default(), body, is_redirect)))
    }

    fn accept(&self, title: &str, is_redirect: bool) -> bool {
        if title.is_empty() {
            return false;
        }
        if self.options.redirects_only != is_redirect {
            return false;
        }
        let lower = title.to_lowercase();
        for namespace in ["wikipedia:", "file:", "portal:", "template:"] {
            if lower.contains(namespace) {
                return false;
            }
        }
        if !self.options.include_categories && lower.contains("category:") {
            return false;
        }
        if lower.ends_with("(disambiguation)") {
            return false;
        }
        let squashed: String = lower.chars().filter(|c| !c.is_whitespace()).collect();
        if squashed.starts_with("listof") {
            return false;
        }
        true
    }
}

fn extract_title(line: &str) -> Option<&str> {
    let start = memmem::find(line.as_bytes(), b"<title>")? + "<title>".len();
    let end = memmem::find(line.as_bytes(), b"</title>")?;
    if end < start {
        return None;
    }
    Some(&line[start..end])
}

impl Iterator for DumpReader {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.options.limit > 0 && self.emitted >= self.options.limit {
            return None;
        }
        loop {
            match self.next_page() {
                Err(e) => return Some(Err(e)),
                Ok(None) => return None,
                Ok(Some((title, body, is_redirect))) => {
                    if self.accept(&title, is_redirect) {
                        self.emitted += 1;
                        return Some(Ok(RawRecord { title, body }));
                    }
                    self.skipped += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_dump(dir: &TempDir, pages: &[(&str, &str)]) -> std::path::PathBuf {
        let path = dir.path().join("dump.xml");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "<mediawiki>").unwrap();
        for (title, text) in pages {
            writeln!(file, "  <page>").unwrap();
            writeln!(file, "    <title>{}</title>", title).unwrap();
            writeln!(file, "    <text xml:space=\"preserve\">{}</text>", text).unwrap();
            writeln!(file, "  </page>").unwrap();
        }
        writeln!(file, "</mediawiki>").unwrap();
        path
    }

    fn titles(path: &Path, options: DumpOptions) -> Vec<String> {
        DumpReader::open(path, options)
            .unwrap()
            .map(|r| r.unwrap().title)
            .collect()
    }

    #[test]
    fn yields_pages_in_document_order() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(&dir, &[("Paris", "a"), ("Berlin", "b")]);
        assert_eq!(titles(&path, DumpOptions::default()), vec!["Paris", "Berlin"]);
    }

    #[test]
    fn body_keeps_casing_and_drops_empty_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.xml");
        let mut file = File::create(&path).unwrap();
        write!(
            file,
            "<mediawiki>\n<page>\n<title>Foo</title>\n\n\n<text>BoDy Text</text>\n</page>\n</mediawiki>\n"
        )
        .unwrap();

        let records: Vec<_> = DumpReader::open(&path, DumpOptions::default())
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].body.contains("BoDy Text"));
        assert!(records[0].body.contains("<title>Foo</title>"));
        assert!(!records[0].body.contains("\n\n"));
    }

    #[test]
    fn filters_internal_namespaces() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(
            &dir,
            &[
                ("Wikipedia:About", "x"),
                ("File:Photo.jpg", "x"),
                ("Portal:Europe", "x"),
                ("Template:Cite", "x"),
                ("Paris", "x"),
            ],
        );
        assert_eq!(titles(&path, DumpOptions::default()), vec!["Paris"]);
    }

    #[test]
    fn category_titles_only_on_request() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(&dir, &[("Category:France", "x"), ("Paris", "x")]);

        assert_eq!(titles(&path, DumpOptions::default()), vec!["Paris"]);
        let opts = DumpOptions {
            include_categories: true,
            ..Default::default()
        };
        assert_eq!(titles(&path, opts), vec!["Category:France", "Paris"]);
    }

    #[test]
    fn filters_disambiguation_and_lists() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(
            &dir,
            &[
                ("Mercury (disambiguation)", "x"),
                ("List of rivers", "x"),
                ("ListOf towns", "x"),
                ("Paris", "x"),
            ],
        );
        assert_eq!(titles(&path, DumpOptions::default()), vec!["Paris"]);
    }

    #[test]
    fn redirects_mode_yields_only_redirects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.xml");
        let mut file = File::create(&path).unwrap();
        write!(
            file,
            "<mediawiki>\n<page>\n<title>Paris</title>\n<text>t</text>\n</page>\n\
             <page>\n<title>City of Light</title>\n<redirect title=\"Paris\"/>\n<text>r</text>\n</page>\n\
             </mediawiki>\n"
        )
        .unwrap();

        assert_eq!(titles(&path, DumpOptions::default()), vec!["Paris"]);
        let opts = DumpOptions {
            redirects_only: true,
            ..Default::default()
        };
        assert_eq!(titles(&path, opts), vec!["City of Light"]);
    }

    #[test]
    fn limit_stops_emission() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(&dir, &[("A1", "x"), ("B2", "x"), ("C3", "x")]);
        let opts = DumpOptions {
            limit: 2,
            ..Default::default()
        };
        assert_eq!(titles(&path, opts), vec!["A1", "B2"]);
    }

    #[test]
    fn malformed_page_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.xml");
        let mut file = File::create(&path).unwrap();
        write!(
            file,
            "<mediawiki>\n<page>\n<text>no title here</text>\n</page>\n\
             <page>\n<title>Paris</title>\n<text>t</text>\n</page>\n</mediawiki>\n"
        )
        .unwrap();

        let mut reader = DumpReader::open(&path, DumpOptions::default()).unwrap();
        let records: Vec<_> = reader.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Paris");
        assert!(reader.skipped() >= 1);
    }

    #[test]
    fn reads_bz2_compressed_dump() {
        use bzip2::write::BzEncoder;
        use bzip2::Compression;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.xml.bz2");
        let file = File::create(&path).unwrap();
        let mut enc = BzEncoder::new(file, Compression::default());
        write!(
            enc,
            "<mediawiki>\n<page>\n<title>Paris</title>\n<text>t</text>\n</page>\n</mediawiki>\n"
        )
        .unwrap();
        enc.finish().unwrap();

        assert_eq!(titles(&path, DumpOptions::default()), vec!["Paris"]);
    }
}
