use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use tasksync_core::{DocumentSink, DocumentSource, HostError, Scope};

/// A markdown file on disk.
///
/// The text handed out by [`DocumentSource::text`] is remembered; `replace`
/// refuses to overwrite the file if it no longer matches, and writes through a
/// temporary file in the same directory.
#[derive(Debug)]
pub struct FileDocument {
    path: PathBuf,
    scope: Scope,
    snapshot: RefCell<Option<String>>,
}

impl FileDocument {
    pub fn new(path: PathBuf, scope: Scope) -> Self {
        Self {
            path,
            scope,
            snapshot: RefCell::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_error(&self, err: std::io::Error) -> HostError {
        HostError::Read {
            identity: self.path.display().to_string(),
            message: err.to_string(),
        }
    }

    fn write_error(&self, err: impl ToString) -> HostError {
        HostError::Write {
            identity: self.path.display().to_string(),
            message: err.to_string(),
        }
    }
}

impl DocumentSource for FileDocument {
    fn identity(&self) -> Scope {
        self.scope.clone()
    }

    fn text(&self) -> Result<String, HostError> {
        let text = fs::read_to_string(&self.path).map_err(|err| self.read_error(err))?;
        *self.snapshot.borrow_mut() = Some(text.clone());
        Ok(text)
    }
}

impl DocumentSink for FileDocument {
    fn replace(&mut self, text: &str) -> Result<(), HostError> {
        if let Some(snapshot) = self.snapshot.borrow().as_deref() {
            let current = fs::read_to_string(&self.path).map_err(|err| self.read_error(err))?;
            if current != snapshot {
                return Err(HostError::Conflict(self.path.display().to_string()));
            }
        }

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = NamedTempFile::new_in(&parent).map_err(|err| self.write_error(err))?;
        temp.write_all(text.as_bytes())
            .map_err(|err| self.write_error(err))?;
        if let Ok(metadata) = fs::metadata(&self.path) {
            fs::set_permissions(temp.path(), metadata.permissions())
                .map_err(|err| self.write_error(err))?;
        }
        temp.persist(&self.path)
            .map_err(|err| self.write_error(err.error))?;
        debug!(path = %self.path.display(), bytes = text.len(), "rewrote document");

        *self.snapshot.borrow_mut() = Some(text.to_string());
        Ok(())
    }
}
