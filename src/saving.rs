use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

/// Write `value` as gzip-compressed JSON
///
/// The snapshot is written to a sibling temporary file and renamed into
/// place, so a crash mid-write leaves the previous snapshot intact.
pub fn save_snapshot<T: Serialize>(value: &T, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");

    {
        let file = File::create(&tmp)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut writer = BufWriter::new(encoder);
        serde_json::to_writer(&mut writer, value)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        writer.flush()?;
        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?.sync_all()?;
    }

    fs::rename(&tmp, path)
}

/// Read a snapshot written by [`save_snapshot`]; `Ok(None)` if the file does not exist.
pub fn load_snapshot<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let reader = BufReader::new(GzDecoder::new(file));

    let value = serde_json::from_reader(reader)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json.gz");

        let mut value = BTreeMap::new();
        value.insert("alice".to_string(), vec![1u64, 2, 3]);
        save_snapshot(&value, &path).unwrap();

        let loaded: Option<BTreeMap<String, Vec<u64>>> = load_snapshot(&path).unwrap();
        assert_eq!(loaded, Some(value));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Vec<u8>> = load_snapshot(&dir.path().join("absent.gz")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn garbage_snapshot_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.gz");
        fs::write(&path, b"not gzip").unwrap();
        let err = load_snapshot::<Vec<u8>>(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
