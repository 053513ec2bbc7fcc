use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use etl_core::types::FileState;
use etl_core::{Error, Result};

/// The on-disk shape of `<root>/.processing-state.json`: a flat array of
/// [`FileState`] rows, one per `(path, content_hash)` pair ever claimed.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct StateDocument {
    pub rows: Vec<FileState>,
}

/// Loads the document, returning an empty one if the file does not yet
/// exist (a fresh log root with no prior runs).
pub fn load(path: &Path) -> Result<StateDocument> {
    match fs::read(path) {
        Ok(bytes) => {
            if bytes.is_empty() {
                return Ok(StateDocument::default());
            }
            serde_json::from_slice(&bytes).map_err(Error::Serialization)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateDocument::default()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Writes the document atomically: serialize to a sibling temp file,
/// fsync it, then rename over the target. A reader never observes a
/// partially written document, even if the process is killed mid-write.
pub fn save(path: &Path, document: &StateDocument) -> Result<()> {
    let body = serde_json::to_vec_pretty(document).map_err(Error::Serialization)?;

    let tmp_path = tmp_path_for(path);
    {
        let mut tmp = File::create(&tmp_path).map_err(Error::Io)?;
        tmp.write_all(&body).map_err(Error::Io)?;
        tmp.sync_all().map_err(Error::Io)?;
    }
    fs::rename(&tmp_path, path).map_err(Error::Io)?;

    if let Some(dir) = path.parent() {
        if let Ok(dir_handle) = File::open(dir) {
            let _ = dir_handle.sync_all();
        }
    }
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| format!(".{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| ".processing-state.json.tmp".to_string());
    tmp.set_file_name(file_name);
    tmp
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_core::types::FileStatus;

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".processing-state.json");

        let mut doc = StateDocument::default();
        doc.rows.push(FileState {
            path: PathBuf::from("/logs/2025-08-29/access.log"),
            content_hash: "abc123".to_string(),
            cheap_hash: "cheap".to_string(),
            status: FileStatus::Completed,
            records_ingested: 10,
            parse_failures: 1,
            bytes_consumed: 2048,
            start_time: None,
            end_time: None,
            error_message: None,
            processor_version: "0.1.0".to_string(),
        });

        save(&path, &doc).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(loaded.rows[0].content_hash, "abc123");
    }

    #[test]
    fn missing_file_loads_as_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".processing-state.json");
        let doc = load(&path).unwrap();
        assert!(doc.rows.is_empty());
    }
}
