//! On-disk run log: an append-only directory holding one file per closed
//! run, named `<uuid>.run`, containing exactly the bytes `RunStore::export`
//! produced. Writes go through a temp file and rename so a crash never
//! leaves a half-written run behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const RUN_EXT: &str = "run";

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("run log I/O: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct RunLog {
    dir: PathBuf,
}

impl RunLog {
    /// Opens (creating if needed) the log directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, LogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, uuid: &str) -> PathBuf {
        self.dir.join(format!("{uuid}.{RUN_EXT}"))
    }

    /// Persists one run's export bytes. Temp-write then rename.
    pub fn save(&self, uuid: &str, bytes: &[u8]) -> Result<(), LogError> {
        let tmp = self.dir.join(format!("{uuid}.tmp"));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, self.path_for(uuid))?;
        Ok(())
    }

    pub fn load(&self, uuid: &str) -> Result<Vec<u8>, LogError> {
        Ok(fs::read(self.path_for(uuid))?)
    }

    /// Uuids of all persisted runs, in no particular order.
    pub fn list(&self) -> Result<Vec<String>, LogError> {
        let mut uuids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RUN_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                uuids.push(stem.to_string());
            }
        }
        Ok(uuids)
    }
}
