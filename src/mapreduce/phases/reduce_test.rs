//! Unit tests for the aggregator

use super::*;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::mapreduce::record::{GroupKey, HashSurrogate};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn aggregator(flush_groups: usize) -> Aggregator {
    Aggregator::new(&PipelineConfig {
        reduce_flush_groups: flush_groups,
        ..PipelineConfig::default()
    })
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Output parsed into `dim0:dim1:dim2 -> sums`, failing on a repeated key
fn sums(path: &Path) -> BTreeMap<String, Vec<i64>> {
    let mut result = BTreeMap::new();
    for r in csv::Reader::from_path(path).unwrap().records() {
        let r = r.unwrap();
        let key = format!("{}:{}:{}", &r[0], &r[1], &r[2]);
        let values: Vec<i64> = r.iter().skip(3).map(|v| v.parse().unwrap()).collect();
        assert!(
            result.insert(key.clone(), values).is_none(),
            "group {key} written more than once"
        );
    }
    result
}

#[test]
fn test_sums_per_literal_group() {
    let dir = TempDir::new().unwrap();
    let input = write(
        &dir,
        "merged.csv",
        "a,b,c,m1,m2\nx,y,z,1,2\nx,y,z,3,4\np,q,r,5,5\n",
    );
    let output = dir.path().join("output.csv");

    let report = aggregator(100).aggregate(&input, &output).unwrap();

    assert_eq!(report.rows_in, 3);
    assert_eq!(report.groups_out, 2);
    assert_eq!(report.flushes, 1);
    let result = sums(&output);
    assert_eq!(result["x:y:z"], vec![4, 6]);
    assert_eq!(result["p:q:r"], vec![5, 5]);
    assert!(std::fs::read_to_string(&output)
        .unwrap()
        .starts_with("a,b,c,m1,m2\n"));
}

#[test]
fn test_colliding_surrogates_stay_separate_groups() {
    let dir = TempDir::new().unwrap();
    // Both keys join to "a:b:c:d", so they share a surrogate
    let input = write(&dir, "merged.csv", "a,b,c,m\na:b,c,d,1\na,b:c,d,10\na:b,c,d,2\n");
    let output = dir.path().join("output.csv");

    aggregator(100).aggregate(&input, &output).unwrap();

    let rows: Vec<csv::StringRecord> = csv::Reader::from_path(&output)
        .unwrap()
        .records()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    let mut found: Vec<(String, String)> = rows
        .iter()
        .map(|r| (format!("{}|{}|{}", &r[0], &r[1], &r[2]), r[3].to_string()))
        .collect();
    found.sort();
    assert_eq!(
        found,
        vec![
            ("a:b|c|d".to_string(), "3".to_string()),
            ("a|b:c|d".to_string(), "10".to_string()),
        ]
    );
}

#[test]
fn test_aggregating_output_again_is_stable() {
    let dir = TempDir::new().unwrap();
    let body: String = (0..300)
        .map(|i| format!("g{},h{},k,{},{}\n", i % 11, i % 3, i, -i))
        .collect();
    let input = write(&dir, "merged.csv", &format!("a,b,c,m1,m2\n{body}"));
    let first = dir.path().join("first.csv");
    let second = dir.path().join("second.csv");

    aggregator(1000).aggregate(&input, &first).unwrap();
    aggregator(1000).aggregate(&first, &second).unwrap();

    assert_eq!(
        std::fs::read_to_string(&first).unwrap(),
        std::fs::read_to_string(&second).unwrap()
    );
}

#[test]
fn test_flush_threshold_splits_output() {
    let dir = TempDir::new().unwrap();
    let body: String = (0..10).map(|i| format!("k{i},y,z,1\n")).collect();
    let input = write(&dir, "merged.csv", &format!("a,b,c,m\n{body}"));
    let output = dir.path().join("output.csv");

    let report = aggregator(3).aggregate(&input, &output).unwrap();

    // Groups are flushed whenever a fourth one appears
    assert!(report.flushes >= 3);
    assert_eq!(report.groups_out, 10);
    assert_eq!(sums(&output).len(), 10);
}

#[test]
fn test_group_reaching_threshold_is_not_split() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "merged.csv", "a,b,c,m\nk1,y,z,1\nk2,y,z,1\nk2,y,z,1\n");
    let output = dir.path().join("output.csv");

    let report = aggregator(1).aggregate(&input, &output).unwrap();

    assert_eq!(report.groups_out, 2);
    let result = sums(&output);
    assert_eq!(result["k1:y:z"], vec![1]);
    assert_eq!(result["k2:y:z"], vec![2]);
}

#[test]
fn test_flushes_keep_one_row_per_group_in_surrogate_order() {
    let dir = TempDir::new().unwrap();
    let mut rows: Vec<(HashSurrogate, String)> = (0..400)
        .map(|i| {
            let key = GroupKey::new(format!("g{}", i % 37), "y", format!("s{}", i % 5));
            (key.surrogate(), format!("{},{}\n", key.fields().join(","), i))
        })
        .collect();
    rows.sort_by_key(|(surrogate, _)| *surrogate);
    let body: String = rows.into_iter().map(|(_, line)| line).collect();
    let input = write(&dir, "merged.csv", &format!("a,b,c,m\n{body}"));
    let output = dir.path().join("output.csv");

    let report = aggregator(4).aggregate(&input, &output).unwrap();

    assert!(report.flushes > 1);
    let result = sums(&output);
    assert_eq!(report.groups_out as usize, result.len());
    let total: i64 = result.values().map(|v| v[0]).sum();
    assert_eq!(total, (0..400).sum::<i64>());
    let expected: i64 = (0..400).filter(|i| i % 37 == 0 && i % 5 == 0).sum();
    assert_eq!(result["g0:y:s0"], vec![expected]);
}

#[test]
fn test_non_integer_metric_is_fatal() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "merged.csv", "a,b,c,m\nx,y,z,1\nx,y,z,1.5\n");

    let err = aggregator(10)
        .aggregate(&input, &dir.path().join("output.csv"))
        .unwrap_err();
    match err {
        PipelineError::MalformedRow { line, reason, .. } => {
            assert_eq!(line, 3);
            assert!(reason.contains("1.5"));
        }
        other => panic!("Expected MalformedRow, got {other:?}"),
    }
}

#[test]
fn test_overflow_is_fatal() {
    let dir = TempDir::new().unwrap();
    let input = write(
        &dir,
        "merged.csv",
        &format!("a,b,c,m\nx,y,z,{}\nx,y,z,1\n", i64::MAX),
    );

    let err = aggregator(10)
        .aggregate(&input, &dir.path().join("output.csv"))
        .unwrap_err();
    match err {
        PipelineError::MetricOverflow { key, column } => {
            assert_eq!(key, "x:y:z");
            assert_eq!(column, "m");
        }
        other => panic!("Expected MetricOverflow, got {other:?}"),
    }
}

#[test]
fn test_negative_and_padded_metrics() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "merged.csv", "a,b,c,m\nx,y,z, -4\nx,y,z,+10\n");
    let output = dir.path().join("output.csv");

    aggregator(10).aggregate(&input, &output).unwrap();

    assert_eq!(sums(&output)["x:y:z"], vec![6]);
}
