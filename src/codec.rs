use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Hard ceiling on any single length prefix; a corrupt file must not
/// translate into a multi-gigabyte allocation.
const MAX_PREFIX: u32 = 512 * 1024 * 1024;

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_u32::<LittleEndian>(v)?;
    Ok(())
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    Ok(r.read_u32::<LittleEndian>()?)
}

/// None at a clean end-of-stream, for files that are a bare concatenation
/// of records with no leading count.
pub fn read_u32_opt<R: Read>(r: &mut R) -> Result<Option<u32>> {
    match r.read_u32::<LittleEndian>() {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_u64::<LittleEndian>(v)?;
    Ok(())
}

pub fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    Ok(r.read_u64::<LittleEndian>()?)
}

pub fn write_f32<W: Write>(w: &mut W, v: f32) -> Result<()> {
    w.write_f32::<LittleEndian>(v)?;
    Ok(())
}

pub fn read_f32<R: Read>(r: &mut R) -> Result<f32> {
    Ok(r.read_f32::<LittleEndian>()?)
}

pub fn write_f64<W: Write>(w: &mut W, v: f64) -> Result<()> {
    w.write_f64::<LittleEndian>(v)?;
    Ok(())
}

pub fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    Ok(r.read_f64::<LittleEndian>()?)
}

/// Length-prefixed UTF-8.
pub fn write_str<W: Write>(w: &mut W, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() as u64 > MAX_PREFIX as u64 {
        bail!("string too long to serialize: {} bytes", bytes.len());
    }
    w.write_u32::<LittleEndian>(bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}

pub fn read_str<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u32::<LittleEndian>()?;
    if len > MAX_PREFIX {
        bail!("string length prefix out of range: {}", len);
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).context("string payload is not valid UTF-8")
}

/// Validates a length prefix against the declared element width before the
/// caller allocates for it.
pub fn checked_len(len: u32, elem_size: usize) -> Result<usize> {
    let bytes = len as u64 * elem_size as u64;
    if bytes > MAX_PREFIX as u64 {
        bail!("length prefix out of range: {} elements", len);
    }
    Ok(len as usize)
}

pub fn open_writer(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create file: {:?}", path))?;
    Ok(BufWriter::with_capacity(128 * 1024, file))
}

pub fn open_reader(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    Ok(BufReader::with_capacity(128 * 1024, file))
}

/// Runs `write` against a temp sibling, then renames into place so readers
/// never observe a half-written file.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let tmp_path = path.with_extension("tmp");
    let mut writer = open_writer(&tmp_path)?;
    write(&mut writer)?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush: {:?}", tmp_path))?;
    drop(writer);
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", tmp_path, path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn scalar_roundtrip() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 42).unwrap();
        write_u64(&mut buf, u64::MAX).unwrap();
        write_f32(&mut buf, 0.5).unwrap();
        write_f64(&mut buf, -77.0222167).unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(read_u32(&mut r).unwrap(), 42);
        assert_eq!(read_u64(&mut r).unwrap(), u64::MAX);
        assert_eq!(read_f32(&mut r).unwrap(), 0.5);
        assert_eq!(read_f64(&mut r).unwrap(), -77.0222167);
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = Vec::new();
        write_str(&mut buf, "Ünîcödé_title").unwrap();
        write_str(&mut buf, "").unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(read_str(&mut r).unwrap(), "Ünîcödé_title");
        assert_eq!(read_str(&mut r).unwrap(), "");
    }

    #[test]
    fn string_rejects_oversized_prefix() {
        let mut buf = Vec::new();
        write_u32(&mut buf, u32::MAX).unwrap();
        let mut r = Cursor::new(buf);
        assert!(read_str(&mut r).is_err());
    }

    #[test]
    fn string_rejects_truncated_payload() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 10).unwrap();
        buf.extend_from_slice(b"abc");
        let mut r = Cursor::new(buf);
        assert!(read_str(&mut r).is_err());
    }

    #[test]
    fn checked_len_bounds() {
        assert_eq!(checked_len(100, 8).unwrap(), 100);
        assert!(checked_len(u32::MAX, 8).is_err());
    }

    #[test]
    fn write_atomic_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        write_atomic(&path, |w| write_u32(w, 7)).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let mut r = open_reader(&path).unwrap();
        assert_eq!(read_u32(&mut r).unwrap(), 7);
    }

    #[test]
    fn write_atomic_failure_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        write_atomic(&path, |w| write_u32(w, 1)).unwrap();

        let result: Result<()> = write_atomic(&path, |_| anyhow::bail!("boom"));
        assert!(result.is_err());

        let mut r = open_reader(&path).unwrap();
        assert_eq!(read_u32(&mut r).unwrap(), 1);
    }
}
