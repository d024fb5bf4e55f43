//! File-backed identity store

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use hansel_core::error::StoreError;
use hansel_core::Identity;

/// A file path guarded by a reader/writer lock
///
/// Readers share the lock; the single writer is exclusive. The file is opened
/// fresh for each access and closed before the guard is released, including
/// when the closure fails.
#[derive(Debug)]
pub struct LockedFile {
    path: RwLock<PathBuf>,
}

impl LockedFile {
    /// Wrap `path`, creating an empty file (and parent directories) if absent
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        Ok(Self {
            path: RwLock::new(path),
        })
    }

    /// Run `f` on the file opened read-only, under the shared lock
    pub fn read<T>(&self, f: impl FnOnce(&mut File) -> io::Result<T>) -> Result<T, StoreError> {
        let path = self.path.read().unwrap_or_else(PoisonError::into_inner);
        let result = File::open(&*path).and_then(|mut file| f(&mut file));
        result.map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })
    }

    /// Run `f` on the file opened for reading and appending, under the
    /// exclusive lock
    pub fn write<T>(&self, f: impl FnOnce(&mut File) -> io::Result<T>) -> Result<T, StoreError> {
        let path = self.path.write().unwrap_or_else(PoisonError::into_inner);
        let result = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&*path)
            .and_then(|mut file| f(&mut file));
        result.map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })
    }

    /// Path of the guarded file
    pub fn path(&self) -> PathBuf {
        self.path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// The authorized and pending identity sets
#[derive(Debug)]
pub struct IdentityStore {
    authorized: LockedFile,
    pending: LockedFile,
}

impl IdentityStore {
    /// Open both identity files, creating them empty if absent
    pub fn open(authorized: &Path, pending: &Path) -> Result<Self, StoreError> {
        let store = Self {
            authorized: LockedFile::create(authorized)?,
            pending: LockedFile::create(pending)?,
        };
        tracing::debug!(
            "Identity store opened (authorized: {:?}, pending: {:?})",
            authorized,
            pending
        );
        Ok(store)
    }

    /// Whether `identity` is in the authorized set right now
    pub fn is_authorized(&self, identity: &Identity) -> Result<bool, StoreError> {
        let path = self.authorized.path();
        self.authorized.read(|file| {
            let content = read_all(file)?;
            Ok(contains(&content, identity, &path))
        })
    }

    /// Add `identity` to the pending set unless it is already there
    ///
    /// The check and the append happen under one exclusive lock. Returns
    /// true if a record was written. Identities that would not read back as
    /// themselves are refused with [`StoreError::Unstorable`].
    pub fn mark_pending(&self, identity: &Identity) -> Result<bool, StoreError> {
        if !identity.is_well_formed() {
            return Err(StoreError::Unstorable {
                user: identity.user.clone(),
            });
        }

        let path = self.pending.path();
        self.pending.write(|file| {
            let content = read_all(file)?;
            if contains(&content, identity, &path) {
                return Ok(false);
            }

            let mut record = String::new();
            // Keep a hand-edited last line without newline intact
            if !content.is_empty() && !content.ends_with('\n') {
                record.push('\n');
            }
            record.push_str(&identity.to_record());
            record.push('\n');
            file.write_all(record.as_bytes())?;
            file.flush()?;
            Ok(true)
        })
    }

    /// All pending identities, in file order
    pub fn pending(&self) -> Result<Vec<Identity>, StoreError> {
        let path = self.pending.path();
        self.pending.read(|file| Ok(records(&read_all(file)?, &path).collect()))
    }
}

fn read_all(file: &mut File) -> io::Result<String> {
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(content)
}

fn records<'a>(content: &'a str, path: &'a Path) -> impl Iterator<Item = Identity> + 'a {
    content.lines().enumerate().filter_map(move |(index, line)| {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let parsed = Identity::parse_record(trimmed);
        if parsed.is_none() {
            tracing::warn!("Skipping malformed line {} of {:?}", index + 1, path);
        }
        parsed
    })
}

fn contains(content: &str, identity: &Identity, path: &Path) -> bool {
    records(content, path).any(|record| record == *identity)
}
