use crate::error::{ExportError, Result};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const RECORD_EXT: &str = "tson";

/// `(gameId, table, databaseId)` as encoded in `<game>_<table>_<db>[_...].zip`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArchiveId {
    pub game_id: String,
    pub table: String,
    pub database_id: String,
}

impl ArchiveId {
    pub fn from_path(path: &Path) -> Result<Self> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ExportError::malformed(path, "file name is not valid UTF-8"))?;
        let mut parts = stem.split('_');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(g), Some(t), Some(d)) if !g.is_empty() && !t.is_empty() && !d.is_empty() => {
                Ok(Self {
                    game_id: g.to_string(),
                    table: t.to_string(),
                    database_id: d.to_string(),
                })
            }
            _ => Err(ExportError::malformed(
                path,
                "expected <game>_<table>_<database>.zip",
            )),
        }
    }

    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.game_id, self.table, self.database_id)
    }
}

/// Per-archive output directory: `<root>/<game>/<table>/<db>/`.
pub struct OutputDir {
    dir: PathBuf,
}

impl OutputDir {
    pub fn create(root: &Path, id: &ArchiveId) -> Result<Self> {
        let dir = root
            .join(&id.game_id)
            .join(&id.table)
            .join(&id.database_id);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, key: &str) -> Result<PathBuf> {
        if !is_safe_file_key(key) {
            return Err(ExportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsafe key for a file name: {key:?}"),
            )));
        }
        Ok(self.dir.join(format!("{key}.{RECORD_EXT}")))
    }

    /// Keys that already have a record file; these are skipped on resume.
    pub fn existing_keys(&self) -> Result<HashSet<String>> {
        let mut out = HashSet::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let p = entry.path();
            if p.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            if let Some(stem) = p.file_stem().and_then(|s| s.to_str()) {
                out.insert(stem.to_string());
            }
        }
        Ok(out)
    }

    /// Write the full payload to a temp file beside the target, then rename,
    /// so a reader never sees a half-written record.
    pub fn write_record(&self, key: &str, payload: &[u8]) -> Result<PathBuf> {
        let target = self.record_path(key)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&self.dir)?;
        tmp.write_all(payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(target)
    }
}

fn is_safe_file_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\'])
        && !key.chars().any(char::is_control)
}
