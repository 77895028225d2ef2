use std::fs;
use std::io::Read;
use std::path::PathBuf;

use crate::error::{RedoError, Result};
use crate::types::Scn;

/// Key naming helpers shared by the checkpointer and schema persistence:
/// `<db>-chkpt-<scn>` for checkpoints, `<db>-schema-<scn>` for detached
/// schema snapshots, `base-<version>` for the adaptive-schema bootstrap.
pub fn checkpoint_key(database: &str, scn: Scn) -> String {
    format!("{}-chkpt-{}", database, scn.0)
}

pub fn schema_key(database: &str, scn: Scn) -> String {
    format!("{}-schema-{}", database, scn.0)
}

pub fn parse_checkpoint_key(database: &str, name: &str) -> Option<Scn> {
    let prefix = format!("{}-chkpt-", database);
    name.strip_prefix(&prefix)?.parse::<u64>().ok().map(Scn)
}

/// Abstract persistent key-value surface for checkpoints and schema
/// snapshots. Implementations must make `write` atomic with respect to
/// concurrent readers.
pub trait StateStore: Send + Sync {
    fn list(&self) -> Result<Vec<String>>;
    fn read(&self, name: &str, max_size: usize) -> Result<Option<Vec<u8>>>;
    fn write(&self, name: &str, scn: Scn, data: &[u8]) -> Result<()>;
    fn drop_entry(&self, name: &str) -> Result<()>;
}

/// Default state store: a directory of JSON files, written via a temp file
/// and an atomic rename.
pub struct FsStateStore {
    dir: PathBuf,
}

impl FsStateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        // keys are flat names; reject anything that would escape the directory
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(RedoError::StateStore(format!("invalid key: {:?}", name)));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

impl StateStore for FsStateStore {
    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(stem) = file_name.strip_suffix(".json") {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str, max_size: usize) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name)?;
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata()?;
        if meta.len() > max_size as u64 {
            return Err(RedoError::StateStore(format!(
                "{} is {} bytes, limit {}",
                name,
                meta.len(),
                max_size
            )));
        }
        let mut data = Vec::with_capacity(meta.len() as usize);
        file.take(max_size as u64).read_to_end(&mut data)?;
        Ok(Some(data))
    }

    fn write(&self, name: &str, _scn: Scn, data: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn drop_entry(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
