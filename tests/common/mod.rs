//! Common test utilities and helpers

#![allow(dead_code)]

use groupsum::PipelineConfig;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Isolated directory with an input file, a work directory and an output path
pub struct TestContext {
    pub temp_dir: TempDir,
    pub input: PathBuf,
    pub config: PipelineConfig,
}

impl TestContext {
    /// Context whose input file holds `content`
    pub fn with_input(content: &str) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let input = temp_dir.path().join("data.csv");
        fs::write(&input, content).expect("write input");

        let config = PipelineConfig {
            output_file: temp_dir.path().join("output.csv"),
            ..PipelineConfig::with_work_dir(temp_dir.path().join("work"))
        };
        Self {
            temp_dir,
            input,
            config,
        }
    }

    /// Same context with a different chunk threshold
    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.config.chunk_size_bytes = bytes;
        self
    }

    pub fn max_parallel(mut self, width: usize) -> Self {
        self.config.max_parallel = width;
        self
    }

    pub fn reduce_flush_groups(mut self, groups: usize) -> Self {
        self.config.reduce_flush_groups = groups;
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    pub fn output(&self) -> &Path {
        &self.config.output_file
    }

    /// Output parsed into `dim0:dim1:dim2 -> sums`
    pub fn output_sums(&self) -> BTreeMap<String, Vec<i64>> {
        read_sums(self.output())
    }
}

/// Parse a grouped-sum CSV into `dim0:dim1:dim2 -> sums`
///
/// Panics if a key appears on more than one row.
pub fn read_sums(path: &Path) -> BTreeMap<String, Vec<i64>> {
    let mut reader = csv::Reader::from_path(path).expect("open output");
    let mut sums: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for record in reader.records() {
        let record = record.expect("read output row");
        let key = format!("{}:{}:{}", &record[0], &record[1], &record[2]);
        let values: Vec<i64> = record
            .iter()
            .skip(3)
            .map(|v| v.parse().expect("integer sum"))
            .collect();
        if let Some(previous) = sums.insert(key.clone(), values) {
            panic!("group {key} written more than once (earlier sums {previous:?})");
        }
    }
    sums
}

/// Deterministic dataset of `rows` rows over a small key space
pub fn generate_dataset(rows: usize, metrics: usize) -> String {
    let mut content = String::from("d0,d1,d2");
    for m in 0..metrics {
        content.push_str(&format!(",m{m}"));
    }
    content.push('\n');

    for i in 0..rows {
        content.push_str(&format!("region{},store{},sku{}", i % 5, i % 7, i % 3));
        for m in 0..metrics {
            let value = (i as i64 * 31 + m as i64 * 17) % 1000 - 300;
            content.push_str(&format!(",{value}"));
        }
        content.push('\n');
    }
    content
}

/// Expected sums computed directly in memory
pub fn expected_sums(content: &str) -> BTreeMap<String, Vec<i64>> {
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let mut sums: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for record in reader.records() {
        let record = record.expect("read row");
        let key = format!("{}:{}:{}", &record[0], &record[1], &record[2]);
        let values: Vec<i64> = record.iter().skip(3).map(|v| v.parse().unwrap()).collect();
        let entry = sums.entry(key).or_insert_with(|| vec![0; values.len()]);
        for (slot, value) in entry.iter_mut().zip(values) {
            *slot += value;
        }
    }
    sums
}
