//! Small shared helpers.

use std::path::{Component, Path, PathBuf};

/// Round to two decimal places, the precision used for all reported metrics.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Lexically normalize a path: resolve `.` and `..` components without
/// touching the filesystem.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_truncates_to_cents() {
        assert_eq!(round2(69.999), 70.0);
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(12.0), 12.0);
        assert_eq!(round2(-0.126), -0.13);
    }

    #[test]
    fn clean_path_resolves_dots() {
        assert_eq!(clean_path(Path::new("/a/b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("/a/./b")), PathBuf::from("/a/b"));
        assert_eq!(clean_path(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(clean_path(Path::new(".")), PathBuf::from("."));
    }
}
