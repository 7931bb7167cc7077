use std::{
    fs,
    path::{Path, PathBuf},
};

use imgrecon::config::PipelineConfig;
use imgrecon::pipeline::{self, PipelineOptions, RunPaths, RunSummary, SourcePaths};
use tempfile::TempDir;

/// Scratch layout for one pipeline scenario: uploads tree, media store,
/// database and report directory under a single temp dir.
pub struct Fixture {
    root: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create fixture dir");
        fs::create_dir_all(root.path().join("uploads")).expect("create uploads dir");
        Self { root }
    }

    pub fn uploads(&self) -> PathBuf {
        self.root.path().join("uploads")
    }

    pub fn media(&self) -> PathBuf {
        self.root.path().join("media")
    }

    pub fn db(&self) -> PathBuf {
        self.root.path().join("db").join("images.sqlite")
    }

    pub fn out(&self) -> PathBuf {
        self.root.path().join("reports")
    }

    pub fn write_upload(&self, relative: &str, bytes: &[u8]) {
        let path = self.uploads().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create upload parent dirs");
        }
        fs::write(path, bytes).expect("write upload");
    }

    pub fn write_csv(&self, name: &str, text: &str) -> SourcePaths {
        let path = self.root.path().join(name);
        fs::write(&path, text).expect("write csv source");
        SourcePaths {
            csv: vec![path],
            ..SourcePaths::default()
        }
    }

    pub fn run(&self, sources: &SourcePaths, options: PipelineOptions) -> RunSummary {
        let paths = RunPaths {
            uploads: self.uploads(),
            media: self.media(),
            db: self.db(),
            out_dir: self.out(),
        };
        pipeline::run(sources, &paths, &PipelineConfig::default(), &options).expect("pipeline run")
    }

    /// Data rows of a report, header excluded.
    pub fn report(&self, file_name: &str) -> Vec<Vec<String>> {
        read_rows(&self.out().join(file_name))
    }

    pub fn media_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect_files(&self.media(), &self.media(), &mut files);
        files.sort();
        files
    }
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).expect("open report");
    reader
        .records()
        .map(|record| {
            record
                .expect("report row")
                .iter()
                .map(str::to_string)
                .collect()
        })
        .collect()
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
}
