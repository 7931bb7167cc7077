use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use super::UploadRootError;

/// Basename lookup over every regular file under the uploads root.
#[derive(Debug, Clone, Default)]
pub struct UploadIndex {
    by_name: HashMap<String, Vec<PathBuf>>,
    files: usize,
}

impl UploadIndex {
    /// Walk the tree once. Unreadable sub-directories are skipped with a
    /// warning; an unreadable root is an error.
    pub fn build(root: &Path) -> Result<Self, UploadRootError> {
        let mut index = Self::default();
        visit_dir(root, &mut |path| {
            let Ok(relative) = path.strip_prefix(root) else {
                return;
            };
            let Some(name) = path.file_name().map(|name| name.to_string_lossy().into_owned())
            else {
                return;
            };
            index
                .by_name
                .entry(name)
                .or_default()
                .push(relative.to_path_buf());
            index.files += 1;
        })?;
        for candidates in index.by_name.values_mut() {
            candidates.sort();
        }
        info!(root = %root.display(), files = index.files, "Indexed uploads tree");
        Ok(index)
    }

    /// Relative paths of files named exactly `basename`, sorted.
    pub fn candidates(&self, basename: &str) -> &[PathBuf] {
        self.by_name
            .get(basename)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn visit_dir(root: &Path, visitor: &mut impl FnMut(&Path)) -> Result<(), UploadRootError> {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) if dir != root => {
                warn!(
                    dir = %dir.display(),
                    error = %source,
                    "Failed to read directory while indexing uploads"
                );
                continue;
            }
            Err(source) => {
                return Err(UploadRootError::Io {
                    path: dir.clone(),
                    source,
                });
            }
        };
        for entry_result in entries {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        dir = %dir.display(),
                        error = %err,
                        "Failed to read directory entry while indexing uploads"
                    );
                    continue;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to read file type");
                    continue;
                }
            };
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                visitor(&path);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn indexes_nested_files_by_basename() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("2021/05")).unwrap();
        fs::create_dir_all(root.join("2019/01")).unwrap();
        fs::write(root.join("2021/05/portrait.jpg"), b"a").unwrap();
        fs::write(root.join("2019/01/portrait.jpg"), b"b").unwrap();
        fs::write(root.join("top.png"), b"c").unwrap();

        let index = UploadIndex::build(root).unwrap();
        assert_eq!(index.files, 3);
        assert_eq!(
            index.candidates("portrait.jpg"),
            [
                PathBuf::from("2019/01/portrait.jpg"),
                PathBuf::from("2021/05/portrait.jpg")
            ]
        );
        assert_eq!(index.candidates("top.png"), [PathBuf::from("top.png")]);
        assert!(index.candidates("absent.jpg").is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let err = UploadIndex::build(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, UploadRootError::Io { .. }));
    }
}
