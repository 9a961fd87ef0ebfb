//! File path resolution shared by every file-backed sink (spec §4.8.2 step 1).

use std::path::{Path, PathBuf};

/// Insert an incrementing counter before `base`'s extension until a path
/// that does not yet exist is found.
#[must_use]
pub fn unique_path(base: &Path) -> PathBuf {
    let stem = base.file_stem().map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let ext = base.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = base.parent().unwrap_or_else(|| Path::new(""));

    let mut counter = 1_u64;
    loop {
        let name = match &ext {
            Some(ext) => format!("{stem}-{counter}.{ext}"),
            None => format!("{stem}-{counter}"),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_lands_before_extension() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("app.log");
        let first = unique_path(&base);
        assert_eq!(first, dir.path().join("app-1.log"));

        std::fs::write(&first, b"").unwrap();
        let second = unique_path(&base);
        assert_eq!(second, dir.path().join("app-2.log"));
    }

    #[test]
    fn extensionless_base_still_gets_a_counter() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("app");
        assert_eq!(unique_path(&base), dir.path().join("app-1"));
    }
}
