use std::{
    cell::{Cell, RefCell},
    fs, io,
    path::{Path, PathBuf},
};

use crate::{CoordinateRecord, Error, Result};

/// Whole-collection persistence for a [`CoordinateStore`](crate::CoordinateStore).
pub trait Repository {
    fn load(&self) -> Result<Vec<CoordinateRecord>>;
    fn save(&self, records: &[CoordinateRecord]) -> Result<()>;
}

/// Pretty-printed JSON array. Saves go through a sibling temp file and a
/// rename so the file on disk is always a complete version.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|x| x.to_os_string())
            .unwrap_or_else(|| "coordinates.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Repository for JsonFile {
    fn load(&self) -> Result<Vec<CoordinateRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(x) => x,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };

        serde_json::from_str(&contents).map_err(|source| Error::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, records: &[CoordinateRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }

        let mut output = serde_json::to_string_pretty(records).map_err(|source| Error::Json {
            path: self.path.clone(),
            source,
        })?;
        output.push('\n');

        let temp = self.temp_path();
        fs::write(&temp, &output).map_err(|e| Error::io(&temp, e))?;
        fs::rename(&temp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            Error::io(&self.path, e)
        })
    }
}

/// In-process backend. `fail_saves` makes every save return an I/O error.
#[derive(Debug, Default)]
pub struct Memory {
    records: RefCell<Vec<CoordinateRecord>>,
    saves: Cell<usize>,
    fail_saves: Cell<bool>,
}

impl Memory {
    pub fn new(records: Vec<CoordinateRecord>) -> Self {
        Self {
            records: RefCell::new(records),
            ..Default::default()
        }
    }

    pub fn records(&self) -> Vec<CoordinateRecord> {
        self.records.borrow().clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.get()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.set(fail);
    }
}

impl Repository for Memory {
    fn load(&self) -> Result<Vec<CoordinateRecord>> {
        Ok(self.records())
    }

    fn save(&self, records: &[CoordinateRecord]) -> Result<()> {
        if self.fail_saves.get() {
            return Err(Error::io(
                "<memory>",
                io::Error::other("save rejected"),
            ));
        }
        *self.records.borrow_mut() = records.to_vec();
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Coordinate, Label};

    use super::*;

    fn records() -> Vec<CoordinateRecord> {
        vec![
            CoordinateRecord::new(
                Label::Positive,
                "SiteA",
                Coordinate::new(19.1738, -96.1342).unwrap(),
            )
            .unwrap(),
            CoordinateRecord::new(
                Label::Negative,
                "Field",
                Coordinate::new(-33.8688, 151.2093).unwrap(),
            )
            .unwrap(),
        ]
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFile::new(dir.path().join("coordinates.json"));
        assert!(repo.load().unwrap().is_empty());
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFile::new(dir.path().join("nested/coordinates.json"));
        repo.save(&records()).unwrap();
        assert_eq!(repo.load().unwrap(), records());

        let contents = fs::read_to_string(repo.path()).unwrap();
        assert!(contents.starts_with('['));
        assert!(contents.ends_with("]\n"));
        assert!(!repo.temp_path().exists());
    }

    #[test]
    fn corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinates.json");
        fs::write(&path, "[{\"label\": \"positive\"").unwrap();
        assert!(matches!(
            JsonFile::new(&path).load(),
            Err(Error::Json { .. })
        ));
    }

    #[test]
    fn failed_save_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinates.json");
        let repo = JsonFile::new(&path);
        repo.save(&records()).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        // a directory in the way of the temp file makes the write fail
        fs::create_dir(repo.temp_path()).unwrap();
        assert!(matches!(repo.save(&[]), Err(Error::Io { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn memory() {
        let repo = Memory::new(records());
        assert_eq!(repo.load().unwrap().len(), 2);
        repo.save(&records()[..1]).unwrap();
        assert_eq!(repo.records().len(), 1);
        assert_eq!(repo.saves(), 1);

        repo.fail_saves(true);
        assert!(repo.save(&[]).is_err());
        assert_eq!(repo.records().len(), 1);
    }
}
