use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Outcome of moving a staged directory into its final location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// The staged directory now lives at the destination.
    Committed,
    /// Another writer got there first; the staged directory was discarded.
    AlreadyPresent,
}

/// Recreate the directory tree at `from` under `to`, hard-linking every file.
///
/// `to` is created if missing. Files are never copied, so the result shares
/// storage with the source tree.
///
/// # Errors
/// Returns an error if the source cannot be walked or a link cannot be created.
pub fn hard_link_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;

    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::hard_link(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Pick an unused staging path next to `dest`, on the same filesystem so a
/// later rename is atomic.
#[must_use]
pub fn staging_path_for(dest: &Path) -> PathBuf {
    let parent = dest.parent().unwrap_or(Path::new("."));
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("dir");
    parent.join(format!(".{name}.tmp-{}-{:08x}", std::process::id(), rand_u32()))
}

/// Atomically move a fully prepared `staged` directory to `dest`.
///
/// If `dest` already exists when the rename happens (a concurrent writer won),
/// the staged directory is removed and [`Commit::AlreadyPresent`] is returned.
///
/// # Errors
/// Returns the rename error if it failed for any other reason. The staged
/// directory is removed in every case.
pub fn commit_dir(staged: &Path, dest: &Path) -> io::Result<Commit> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(staged, dest) {
        Ok(()) => Ok(Commit::Committed),
        Err(e) => {
            let _ = fs::remove_dir_all(staged);
            if dest.exists() {
                Ok(Commit::AlreadyPresent)
            } else {
                Err(e)
            }
        }
    }
}

/// Hard-link `from` into a staging directory and commit it to `dest`.
///
/// This is the only write path for materialized trees: readers either see no
/// `dest` or a complete one.
///
/// # Errors
/// Returns an error if linking or committing fails for a reason other than a
/// lost race.
pub fn link_tree_atomic(from: &Path, dest: &Path) -> io::Result<Commit> {
    let staged = staging_path_for(dest);
    if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent)?;
    }

    if let Err(e) = hard_link_tree(from, &staged) {
        let _ = fs::remove_dir_all(&staged);
        return Err(e);
    }

    commit_dir(&staged, dest)
}

#[allow(clippy::cast_possible_truncation)]
fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    // Only needs to differ between concurrent stagers
    hasher.write_u128(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    hasher.finish() as u32
}
