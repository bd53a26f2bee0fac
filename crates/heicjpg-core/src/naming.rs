use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Trailing "(n)" counter on a file stem.
static COUNTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*)\((\d+)\)$").unwrap());

/// Split a stem like `name(3)` into ("name", 3). Stems without a counter start at 1.
fn split_counter(stem: &str) -> (&str, u32) {
    if let Some(caps) = COUNTER_RE.captures(stem) {
        if let (Some(base), Some(n)) = (caps.get(1), caps.get(2)) {
            if let Ok(n) = n.as_str().parse::<u32>() {
                return (base.as_str(), n);
            }
        }
    }
    (stem, 1)
}

/// Return a path that does not currently exist, keeping `path` itself when free.
///
/// Collisions are resolved by probing `base(n).ext`, continuing from an existing
/// counter suffix if the stem already has one. The check is not atomic.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let (mut base, mut counter) = split_counter(stem);

    loop {
        let new_name = if ext.is_empty() {
            format!("{}({})", base, counter)
        } else {
            format!("{}({}).{}", base, counter, ext)
        };
        let candidate = dir.join(&new_name);
        if !candidate.exists() {
            return candidate;
        }
        counter = match counter.checked_add(1) {
            Some(next) => next,
            // counter space exhausted: append a fresh one to the whole stem
            None => {
                base = stem;
                1
            }
        };
    }
}

/// Natural target name for a source file: same stem, target extension.
pub fn target_file_name(source_name: &OsStr, target_extension: &str) -> OsString {
    let mut name = Path::new(source_name)
        .file_stem()
        .unwrap_or(source_name)
        .to_os_string();
    name.push(".");
    name.push(target_extension.trim_start_matches('.'));
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_split_counter() {
        assert_eq!(split_counter("photo"), ("photo", 1));
        assert_eq!(split_counter("shot(5)"), ("shot", 5));
        assert_eq!(split_counter("a (2)"), ("a ", 2));
        assert_eq!(split_counter("weird(x)"), ("weird(x)", 1));
        assert_eq!(split_counter("big(99999999999999999999)"), ("big(99999999999999999999)", 1));
    }

    #[test]
    fn test_free_path_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        assert_eq!(unique_path(&path), path);
    }

    #[test]
    fn test_unique_path() {
        let dir = tempdir().unwrap();
        let photo = dir.path().join("photo.jpg");
        fs::write(&photo, b"1").unwrap();

        let first = unique_path(&photo);
        assert_eq!(first, dir.path().join("photo(1).jpg"));

        fs::write(&first, b"2").unwrap();
        assert_eq!(unique_path(&photo), dir.path().join("photo(2).jpg"));

        let shot = dir.path().join("shot(5).jpg");
        fs::write(&shot, b"3").unwrap();
        assert_eq!(unique_path(&shot), dir.path().join("shot(6).jpg"));
    }

    #[test]
    fn test_unique_path_counter_exhausted() {
        let dir = tempdir().unwrap();
        let last = dir.path().join(format!("x({}).jpg", u32::MAX));
        fs::write(&last, b"x").unwrap();
        assert_eq!(
            unique_path(&last),
            dir.path().join(format!("x({})(1).jpg", u32::MAX))
        );
    }

    #[test]
    fn test_unique_path_without_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("README");
        fs::write(&path, b"x").unwrap();
        assert_eq!(unique_path(&path), dir.path().join("README(1)"));
    }

    #[test]
    fn test_target_file_name() {
        assert_eq!(target_file_name(OsStr::new("IMG_0001.HEIC"), "jpg"), "IMG_0001.jpg");
        assert_eq!(target_file_name(OsStr::new("a.b.heic"), ".jpeg"), "a.b.jpeg");
    }
}
