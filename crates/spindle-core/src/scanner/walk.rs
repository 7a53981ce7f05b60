use crate::error::{Error, Result};
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::{DirEntry, WalkDir};

/// Regular files under `root`, in file-name order.
///
/// Directory symlinks are not descended into. A symlink to a regular file is
/// yielded (its target's content is what gets copied); dangling links are
/// skipped. Anything matching an ignore glob is pruned, directories included.
/// Unreadable entries come through as errors so the caller can decide.
pub fn walk_files<'a>(
    root: &Path,
    ignore_patterns: &'a [Pattern],
) -> impl Iterator<Item = Result<PathBuf>> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| !is_ignored(entry, ignore_patterns))
        .filter_map(|entry| match entry {
            Ok(entry) => regular_file(&entry).map(Ok),
            Err(e) => Some(Err(Error::from(e))),
        })
}

fn is_ignored(entry: &DirEntry, ignore_patterns: &[Pattern]) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let ignored = ignore_patterns
        .iter()
        .any(|pattern| pattern.matches_path(entry.path()));
    if ignored {
        trace!("Ignoring {}", entry.path().display());
    }
    ignored
}

fn regular_file(entry: &DirEntry) -> Option<PathBuf> {
    let file_type = entry.file_type();
    if file_type.is_file() {
        return Some(entry.path().to_path_buf());
    }
    if file_type.is_symlink() {
        match fs::metadata(entry.path()) {
            Ok(target) if target.is_file() => return Some(entry.path().to_path_buf()),
            Ok(_) => {}
            Err(e) => trace!("Skipping dangling link {}: {}", entry.path().display(), e),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names(root: &Path, patterns: &[Pattern]) -> Vec<String> {
        walk_files(root, patterns)
            .map(|p| {
                p.unwrap()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn test_walk_yields_nested_regular_files_sorted() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/deeper")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("z.txt"), "z").unwrap();
        fs::write(root.join("a/one.txt"), "1").unwrap();
        fs::write(root.join("b/deeper/two.txt"), "2").unwrap();
        fs::write(root.join("empty.txt"), "").unwrap();

        assert_eq!(
            names(root, &[]),
            vec!["a/one.txt", "b/deeper/two.txt", "empty.txt", "z.txt"]
        );
    }

    #[test]
    fn test_ignore_patterns_prune_files_and_directories() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("cache")).unwrap();
        fs::write(root.join("cache/blob"), "x").unwrap();
        fs::write(root.join("keep.txt"), "k").unwrap();
        fs::write(root.join("scratch.tmp"), "t").unwrap();

        let patterns = vec![
            Pattern::new("*.tmp").unwrap(),
            Pattern::new("*/cache").unwrap(),
        ];
        assert_eq!(names(root, &patterns), vec!["keep.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_symlinks_followed_directory_symlinks_not() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("target.txt"), "t").unwrap();
        fs::create_dir_all(outside.path().join("sub")).unwrap();
        fs::write(outside.path().join("sub/inner.txt"), "i").unwrap();

        let root = dir.path();
        std::os::unix::fs::symlink(outside.path().join("target.txt"), root.join("link.txt"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path().join("sub"), root.join("linkdir")).unwrap();
        std::os::unix::fs::symlink(root.join("nowhere"), root.join("dangling")).unwrap();

        assert_eq!(names(root, &[]), vec!["link.txt"]);
    }
}
