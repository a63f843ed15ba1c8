//! Local-file cursor store: one file per slot name, contents the decimal LSN.

use std::path::{Path, PathBuf};

use pgcdc_core::{CdcResult, CursorError, Lsn};
use tracing::debug;

use crate::CursorStore;

/// Cursor store backed by plain files in a directory, one per slot name.
/// Writes go through a temp file + rename so a crash mid-write can never
/// leave a torn value behind.
pub struct FileCursorStore {
    dir: PathBuf,
}

impl FileCursorStore {
    /// Use (and create, if missing) `dir` to hold one cursor file per slot.
    pub fn new(dir: impl Into<PathBuf>) -> CdcResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| CursorError::Write(format!("creating {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path_for(&self, slot_name: &str) -> PathBuf {
        self.dir.join(format!("{slot_name}.lsn"))
    }
}

impl CursorStore for FileCursorStore {
    async fn get(&self, slot_name: &str) -> CdcResult<Option<Lsn>> {
        let path = self.path_for(slot_name);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let lsn = contents
                    .trim()
                    .parse::<Lsn>()
                    .map_err(|e| CursorError::Read(format!("parsing {}: {e}", path.display())))?;
                Ok(Some(lsn))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CursorError::Read(format!("reading {}: {e}", path.display())).into()),
        }
    }

    async fn set(&self, slot_name: &str, lsn: Lsn) -> CdcResult<()> {
        let path = self.path_for(slot_name);
        let tmp = tmp_path(&path);

        tokio::fs::write(&tmp, lsn.to_string())
            .await
            .map_err(|e| CursorError::Write(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CursorError::Write(format!("renaming {} -> {}: {e}", tmp.display(), path.display())))?;

        debug!(slot_name, lsn, path = %path.display(), "persisted cursor");
        Ok(())
    }

    async fn close(&self) -> CdcResult<()> {
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("lsn.tmp")
}
