use std::env;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Writes data atomically by using a temporary sibling file followed by rename.  
/// 以臨時檔案搭配 rename 實現原子寫入。
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Canonical identity of a path, also for files that do not exist yet.  
/// 取得路徑的標準形式；檔案尚未存在時以最深的既有上層目錄為準。
///
/// The deepest existing ancestor is resolved through the filesystem (symlinks
/// included) and the missing tail is appended to it unchanged.
pub fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let normalized = lexical_normalize(&absolute);
    for ancestor in normalized.ancestors().skip(1) {
        let Ok(resolved) = fs::canonicalize(ancestor) else {
            continue;
        };
        return match normalized.strip_prefix(ancestor) {
            Ok(tail) => resolved.join(tail),
            Err(_) => normalized.clone(),
        };
    }
    normalized
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                result.pop();
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}
