//! File system utilities

use std::path::{Path, PathBuf};

use crate::core::error_handling::{errors, ReassemblyResult};

/// Ensure directory exists
pub async fn ensure_dir_exists(path: &Path) -> ReassemblyResult<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| errors::filesystem_error(path, e))?;
    }
    Ok(())
}

/// Get file extension
pub fn get_file_extension(filename: &str) -> Option<&str> {
    Path::new(filename).extension().and_then(|ext| ext.to_str())
}

/// Sanitize filename for filesystem
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_matches('.').to_string()
}

/// Sibling path that output is written to before the final rename
pub fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{}.part", name))
}

/// First free path among `name.ext`, `name_1.ext`, `name_2.ext`, ...
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut counter = 1;
    loop {
        let candidate_name = match &extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = path.with_file_name(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Rename `from` over `to`, creating the parent of `to` if needed
pub async fn atomic_replace(from: &Path, to: &Path) -> ReassemblyResult<()> {
    if let Some(parent) = to.parent() {
        ensure_dir_exists(parent).await?;
    }
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| errors::filesystem_error(to, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b:c?.mp4"), "a_b_c_.mp4");
        assert_eq!(sanitize_filename("  My Video. "), "My Video");
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let partial = partial_path(Path::new("/tmp/out/clip.mp4"));
        assert_eq!(partial, PathBuf::from("/tmp/out/.clip.mp4.part"));
    }

    #[test]
    fn test_unique_path_skips_existing_files() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("video.mp4");
        assert_eq!(unique_path(&target), target);

        std::fs::write(&target, b"x").unwrap();
        assert_eq!(unique_path(&target), dir.path().join("video_1.mp4"));

        std::fs::write(dir.path().join("video_1.mp4"), b"x").unwrap();
        assert_eq!(unique_path(&target), dir.path().join("video_2.mp4"));
    }

    #[tokio::test]
    async fn test_atomic_replace_creates_parent() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a.part");
        std::fs::write(&from, b"data").unwrap();
        let to = dir.path().join("nested").join("a.mp4");

        atomic_replace(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"data");
    }
}
