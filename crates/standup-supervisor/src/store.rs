//! One JSON record per service under the state directory.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use standup_config::record_file_name;

use crate::error::StoreError;
use crate::files::atomic_write;
use crate::record::{ProcessRecord, RECORD_SCHEMA_VERSION};

const STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::store");

/// File-backed store of [`ProcessRecord`]s.
#[derive(Debug, Clone)]
pub struct ProcessStore {
    directory: Utf8PathBuf,
}

impl ProcessStore {
    /// Builds a store rooted at `directory`. Nothing is created until a save.
    pub fn new(directory: impl Into<Utf8PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    /// Location of the record for `service`.
    pub fn path_for(&self, service: &str) -> Result<Utf8PathBuf, StoreError> {
        let valid = !service.is_empty()
            && service
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'));
        if !valid {
            return Err(StoreError::InvalidName {
                name: service.to_owned(),
            });
        }
        Ok(self.directory.join(record_file_name(service)))
    }

    /// Loads the record for `service`, if one exists.
    pub fn load(&self, service: &str) -> Result<Option<ProcessRecord>, StoreError> {
        let path = self.path_for(service)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        let record: ProcessRecord = serde_json::from_str(&content)
            .map_err(|source| StoreError::Corrupt { path: path.clone(), source })?;
        if record.is_from_newer_release() {
            warn!(
                target: STORE_TARGET,
                service,
                file = %path,
                schema_version = record.schema_version,
                supported = RECORD_SCHEMA_VERSION,
                "process record was written by a newer release; unknown fields are ignored"
            );
        }
        Ok(Some(record))
    }

    /// Atomically replaces the record for `record.service`.
    pub fn save(&self, record: &ProcessRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.service)?;
        fs::create_dir_all(&self.directory).map_err(|source| StoreError::CreateDirectory {
            path: self.directory.clone(),
            source,
        })?;
        let mut payload =
            serde_json::to_vec_pretty(record).map_err(|source| StoreError::Encode {
                service: record.service.clone(),
                source,
            })?;
        payload.push(b'\n');
        atomic_write(path.as_std_path(), &payload)
            .map_err(|source| StoreError::Write { path: path.clone(), source })?;
        debug!(
            target: STORE_TARGET,
            service = %record.service,
            state = %record.state,
            file = %path,
            "process record saved"
        );
        Ok(())
    }

    /// Removes the record for `service`. A missing record is not an error.
    pub fn delete(&self, service: &str) -> Result<(), StoreError> {
        let path = self.path_for(service)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(target: STORE_TARGET, service, file = %path, "process record removed");
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Remove { path, source }),
        }
    }

    /// Loads every readable record, skipping corrupt files with a warning.
    pub fn list(&self) -> Result<Vec<ProcessRecord>, StoreError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.directory.clone(),
                    source,
                });
            }
        };
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Read {
                path: self.directory.clone(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(service) = file_name
                .to_str()
                .filter(|name| !name.starts_with('.'))
                .and_then(|name| name.strip_suffix(".json"))
            else {
                continue;
            };
            match self.load(service) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(error) => warn!(
                    target: STORE_TARGET,
                    service,
                    error = %error,
                    "skipping unreadable process record"
                ),
            }
        }
        records.sort_by(|left, right| left.service.cmp(&right.service));
        Ok(records)
    }
}
