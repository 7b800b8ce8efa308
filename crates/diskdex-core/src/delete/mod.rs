/// Guarded deletion of indexed paths.
///
/// The steps run in a fixed order:
///
/// 1. [`classify`] the path, both as written and with its parent directory
///    resolved through any symlinks. Anything protected either way is
///    refused before the index is consulted or anything is removed, so a
///    protected path is `Protected` whether or not it is indexed.
/// 2. Look the path up in the store; unknown paths are `NotFound`.
/// 3. Remove it from disk. Files and symlinks are unlinked; directories are
///    removed bottom-up, carrying on past children that cannot be removed.
///    Something already gone counts as removed.
/// 4. Check whether the path still exists. If not, drop it and its
///    descendants from the index. If it does, report what is left and drop
///    only the rows of what was actually removed.
///
/// Confirmation prompts belong to the caller.
use crate::error::Result;
use crate::safety::{classify, PathClass};
use crate::store::EntryStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One object that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalError {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteOutcome {
    /// Gone from disk and from the index.
    Deleted { rows_removed: usize },
    /// Refused by the classifier; nothing was touched.
    Protected(PathClass),
    /// The path is not in the index.
    NotFound,
    /// Some of the tree was removed but `residual` still exists.
    PartialFailure {
        residual: PathBuf,
        errors: Vec<RemovalError>,
    },
}

/// Paths removed and failures met while removing a tree.
#[derive(Debug, Default)]
struct Removal {
    removed: Vec<PathBuf>,
    errors: Vec<RemovalError>,
}

impl Removal {
    fn record(&mut self, path: &Path, result: io::Result<()>) {
        match result {
            Ok(()) => self.removed.push(path.to_path_buf()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.removed.push(path.to_path_buf())
            }
            Err(err) => self.fail(path, &err),
        }
    }

    fn fail(&mut self, path: &Path, err: &io::Error) {
        debug!("Could not remove {}: {err}", path.display());
        self.errors.push(RemovalError {
            path: path.to_path_buf(),
            message: err.to_string(),
        });
    }
}

pub struct DeletionService {
    store: Arc<EntryStore>,
}

impl DeletionService {
    pub fn new(store: Arc<EntryStore>) -> Self {
        Self { store }
    }

    /// Delete `path` from disk and from the index.
    ///
    /// Only a store failure is an `Err`; refusals and partial removals are
    /// outcomes.
    pub fn delete(&self, path: &Path) -> Result<DeleteOutcome> {
        let class = effective_class(path);
        if class.is_protected() {
            warn!("Refusing to delete protected path {} ({class:?})", path.display());
            return Ok(DeleteOutcome::Protected(class));
        }

        if self.store.get(path)?.is_none() {
            return Ok(DeleteOutcome::NotFound);
        }

        let mut removal = Removal::default();
        remove_path(path, &mut removal);

        match fs::symlink_metadata(path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let rows_removed = self.store.delete(path)?;
                info!("Deleted {} ({rows_removed} index rows)", path.display());
                Ok(DeleteOutcome::Deleted { rows_removed })
            }
            _ => {
                warn!(
                    "Partially deleted {}: {} item(s) removed, {} failure(s)",
                    path.display(),
                    removal.removed.len(),
                    removal.errors.len()
                );
                self.store.delete_many(&removal.removed)?;
                Ok(DeleteOutcome::PartialFailure {
                    residual: path.to_path_buf(),
                    errors: removal.errors,
                })
            }
        }
    }
}

/// Classification of `path` as written, or of its real location when that
/// is protected. The final component is not resolved: removing a symlink
/// only unlinks it.
fn effective_class(path: &Path) -> PathClass {
    let lexical = classify(path);
    if lexical.is_protected() {
        return lexical;
    }
    let resolved = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            fs::canonicalize(parent).map(|real| real.join(name))
        }
        // Bare names and paths ending in `..` are resolved whole.
        _ => fs::canonicalize(path),
    };
    match resolved {
        Ok(real) => classify(&real),
        // Nothing on disk to resolve, so nothing to remove through a link.
        Err(_) => lexical,
    }
}

/// Remove whatever is at `path` right now, following no links.
fn remove_path(path: &Path, removal: &mut Removal) {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => remove_tree(path, removal),
        Ok(_) => removal.record(path, fs::remove_file(path)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            removal.removed.push(path.to_path_buf())
        }
        Err(err) => removal.fail(path, &err),
    }
}

/// Post-order removal that keeps going after a failed child.
fn remove_tree(dir: &Path, removal: &mut Removal) {
    match fs::read_dir(dir) {
        Ok(read) => {
            for item in read {
                match item {
                    Ok(item) => {
                        let child = item.path();
                        match item.file_type() {
                            Ok(ft) if ft.is_dir() => remove_tree(&child, removal),
                            Ok(_) => removal.record(&child, fs::remove_file(&child)),
                            Err(err) => removal.fail(&child, &err),
                        }
                    }
                    Err(err) => removal.fail(dir, &err),
                }
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => removal.fail(dir, &err),
    }
    removal.record(dir, fs::remove_dir(dir));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entry;
    use chrono::Utc;
    use tempfile::TempDir;

    fn service() -> (TempDir, Arc<EntryStore>, DeletionService) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(EntryStore::open_in_memory().unwrap());
        let svc = DeletionService::new(store.clone());
        (tmp, store, svc)
    }

    #[test]
    fn protected_path_is_refused_even_when_unindexed() {
        let (_tmp, _store, svc) = service();
        assert_eq!(
            svc.delete(Path::new("/")).unwrap(),
            DeleteOutcome::Protected(PathClass::SystemCritical)
        );
        assert_eq!(
            svc.delete(Path::new("/data/pagefile.sys")).unwrap(),
            DeleteOutcome::Protected(PathClass::ProtectedName)
        );
    }

    #[test]
    fn unindexed_path_is_not_found_and_untouched() {
        let (tmp, _store, svc) = service();
        let file = tmp.path().join("keep.txt");
        fs::write(&file, b"x").unwrap();
        assert_eq!(svc.delete(&file).unwrap(), DeleteOutcome::NotFound);
        assert!(file.exists());
    }

    #[test]
    fn indexed_file_is_removed_from_disk_and_index() {
        let (tmp, store, svc) = service();
        let file = tmp.path().join("junk.bin");
        fs::write(&file, vec![0u8; 64]).unwrap();
        store.upsert(&Entry::file(&file, 64, Utc::now())).unwrap();

        assert_eq!(
            svc.delete(&file).unwrap(),
            DeleteOutcome::Deleted { rows_removed: 1 }
        );
        assert!(!file.exists());
        assert!(store.get(&file).unwrap().is_none());
    }

    #[test]
    fn directory_removal_cascades() {
        let (tmp, store, svc) = service();
        let dir = tmp.path().join("d");
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub/f"), b"abc").unwrap();
        store
            .upsert_batch(&[
                Entry::directory(&dir, Utc::now()),
                Entry::directory(dir.join("sub"), Utc::now()),
                Entry::file(dir.join("sub/f"), 3, Utc::now()),
            ])
            .unwrap();

        assert_eq!(
            svc.delete(&dir).unwrap(),
            DeleteOutcome::Deleted { rows_removed: 3 }
        );
        assert!(!dir.exists());
        assert_eq!(store.stats().unwrap().total_entries, 0);
    }

    #[test]
    fn already_vanished_path_counts_as_deleted() {
        let (tmp, store, svc) = service();
        let ghost = tmp.path().join("ghost");
        store.upsert(&Entry::file(&ghost, 1, Utc::now())).unwrap();
        assert_eq!(
            svc.delete(&ghost).unwrap(),
            DeleteOutcome::Deleted { rows_removed: 1 }
        );
    }

    #[cfg(unix)]
    #[test]
    fn path_through_link_into_trash_is_refused() {
        let (tmp, store, svc) = service();
        let trash = tmp.path().join(".Trash");
        fs::create_dir(&trash).unwrap();
        fs::write(trash.join("keep.txt"), b"precious").unwrap();
        let alias = tmp.path().join("alias");
        std::os::unix::fs::symlink(&trash, &alias).unwrap();
        let via_link = alias.join("keep.txt");
        store.upsert(&Entry::file(&via_link, 8, Utc::now())).unwrap();

        assert_eq!(classify(&via_link), PathClass::Safe);
        assert_eq!(
            svc.delete(&via_link).unwrap(),
            DeleteOutcome::Protected(PathClass::SystemCritical)
        );
        assert!(trash.join("keep.txt").exists());
        assert!(store.get(&via_link).unwrap().is_some());
    }

    /// Restores write permission so `TempDir` can clean up.
    #[cfg(unix)]
    struct Unlock(PathBuf);

    #[cfg(unix)]
    impl Drop for Unlock {
        fn drop(&mut self) {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.0, fs::Permissions::from_mode(0o755));
        }
    }

    #[cfg(unix)]
    #[test]
    fn unremovable_child_yields_partial_failure() {
        use std::os::unix::fs::PermissionsExt;

        let (tmp, store, svc) = service();
        let dir = tmp.path().join("d");
        let locked = dir.join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(dir.join("a.txt"), b"a").unwrap();
        fs::write(locked.join("inner.txt"), b"i").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
        let _unlock = Unlock(locked.clone());

        // Permission bits do not bind root.
        if fs::write(locked.join("write-check"), b"").is_ok() {
            return;
        }

        store
            .upsert_batch(&[
                Entry::directory(&dir, Utc::now()),
                Entry::file(dir.join("a.txt"), 1, Utc::now()),
                Entry::directory(&locked, Utc::now()),
                Entry::file(locked.join("inner.txt"), 1, Utc::now()),
            ])
            .unwrap();

        match svc.delete(&dir).unwrap() {
            DeleteOutcome::PartialFailure { residual, errors } => {
                assert_eq!(residual, dir);
                assert!(!errors.is_empty());
                assert!(errors.iter().any(|e| e.path == locked.join("inner.txt")));
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        }

        assert!(!dir.join("a.txt").exists());
        assert!(store.get(&dir.join("a.txt")).unwrap().is_none());
        assert!(store.get(&dir).unwrap().is_some());
        assert!(store.get(&locked).unwrap().is_some());
        assert!(store.get(&locked.join("inner.txt")).unwrap().is_some());
    }
}
