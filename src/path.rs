//! Index path helpers.
//!
//! Index paths are relative to a monitored root, start with `/` and always use
//! `/` as the separator. The root itself is `/`.

use crate::error::{Result, SyncError};
use std::path::{Component, Path, PathBuf};

/// Append a trailing `/` unless one is already present.
pub fn slash_suffix(s: &str) -> String {
    if s.ends_with('/') {
        s.to_string()
    } else {
        format!("{}/", s)
    }
}

/// Resolve an index path to a location under `root`.
///
/// Rejects parent components, Windows prefixes and anything that escapes the
/// root after lexical normalization. The empty path and `/` resolve to `root`.
pub fn resolve(root: &Path, index_path: &str) -> Result<PathBuf> {
    let relative = index_path.trim_start_matches('/');
    if relative.is_empty() {
        return Ok(root.to_path_buf());
    }

    let rel_path = Path::new(relative);
    for component in rel_path.components() {
        match component {
            Component::ParentDir => {
                return Err(SyncError::InvalidPath(format!(
                    "path traversal not allowed: {}",
                    index_path
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(SyncError::InvalidPath(format!(
                    "absolute paths not allowed: {}",
                    index_path
                )));
            }
            _ => {}
        }
    }

    let full = root.join(rel_path);
    if !normalize(&full).starts_with(normalize(root)) {
        return Err(SyncError::InvalidPath(format!(
            "path escapes root directory: {}",
            index_path
        )));
    }

    Ok(full)
}

/// Convert an absolute path under `root` back into an index path.
pub fn to_index_path(root: &Path, abs: &Path) -> Result<String> {
    let rel = abs.strip_prefix(root).map_err(|_| {
        SyncError::InvalidPath(format!(
            "{} is not under {}",
            abs.display(),
            root.display()
        ))
    })?;

    let mut out = String::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                out.push('/');
                out.push_str(&part.to_string_lossy());
            }
            Component::CurDir => {}
            _ => {
                return Err(SyncError::InvalidPath(format!(
                    "unexpected component in {}",
                    abs.display()
                )));
            }
        }
    }

    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Parent directories of an index path, nearest first, ending with `/`.
pub fn ancestors(index_path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = index_path.trim_end_matches('/');
    while let Some(idx) = current.rfind('/') {
        current = &current[..idx];
        if current.is_empty() {
            out.push("/".to_string());
            break;
        }
        out.push(current.to_string());
    }
    out
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}

/// Normalize a path without requiring it to exist (unlike canonicalize)
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            c => normalized.push(c),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_suffix() {
        assert_eq!(slash_suffix(""), "/");
        assert_eq!(slash_suffix("/"), "/");
        assert_eq!(slash_suffix("/a"), "/a/");
        assert_eq!(slash_suffix("/a/"), "/a/");
    }

    #[test]
    fn test_resolve_inside_root() {
        let root = Path::new("/srv/data");
        assert_eq!(resolve(root, "/").unwrap(), PathBuf::from("/srv/data"));
        assert_eq!(resolve(root, "").unwrap(), PathBuf::from("/srv/data"));
        assert_eq!(
            resolve(root, "/a/b.txt").unwrap(),
            PathBuf::from("/srv/data/a/b.txt")
        );
        assert_eq!(
            resolve(root, "/a/./b.txt").unwrap(),
            PathBuf::from("/srv/data/a/./b.txt")
        );
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let root = Path::new("/srv/data");
        assert!(matches!(
            resolve(root, "/../etc/passwd"),
            Err(SyncError::InvalidPath(_))
        ));
        assert!(resolve(root, "/a/../../b").is_err());
        assert!(resolve(root, "//etc/passwd").is_ok_and(|p| p.starts_with(root)));
    }

    #[test]
    fn test_to_index_path() {
        let root = Path::new("/srv/data");
        assert_eq!(to_index_path(root, Path::new("/srv/data")).unwrap(), "/");
        assert_eq!(
            to_index_path(root, Path::new("/srv/data/a/b.txt")).unwrap(),
            "/a/b.txt"
        );
        assert!(to_index_path(root, Path::new("/elsewhere/x")).is_err());
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("/a/b/c.txt"), vec!["/a/b", "/a", "/"]);
        assert_eq!(ancestors("/top.txt"), vec!["/"]);
        assert!(ancestors("/").is_empty());
    }
}
