//! Performance benchmarks for the merge and the end-to-end pipeline
//! Measures k-way merge throughput across source counts and full runs across pool widths

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use groupsum::mapreduce::phases::map::sort_chunk;
use groupsum::mapreduce::{fnv1a_64, Header, MergeCombiner, Splitter};
use groupsum::{Pipeline, PipelineConfig};
use std::hint::black_box;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::runtime::Runtime;

const ROWS: usize = 50_000;

fn dataset(rows: usize) -> String {
    let mut content = String::from("region,store,sku,units,cents\n");
    for i in 0..rows {
        content.push_str(&format!(
            "r{},s{},k{},{},{}\n",
            i % 17,
            i % 101,
            i % 13,
            i % 9,
            (i * 37) % 10_000
        ));
    }
    content
}

/// Split and sort `rows` into chunks sized for roughly `sources` files
fn prepare_sources(rows: usize, sources: usize) -> (TempDir, PipelineConfig, Header, Vec<PathBuf>) {
    let dir = TempDir::new().unwrap();
    let content = dataset(rows);
    let input = dir.path().join("data.csv");
    std::fs::write(&input, &content).unwrap();

    let config = PipelineConfig {
        chunk_size_bytes: (content.len() / sources).max(1) as u64,
        ..PipelineConfig::with_work_dir(dir.path().join("work"))
    };
    let outcome = Splitter::new(&config).split(&input).unwrap();
    let sorted = outcome
        .chunks
        .iter()
        .map(|chunk| {
            sort_chunk(chunk, b',').unwrap();
            chunk.sorted_file.clone()
        })
        .collect();
    (dir, config, outcome.header, sorted)
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.throughput(Throughput::Elements(ROWS as u64));
    group.sample_size(10);

    for sources in [2, 8, 32] {
        let (dir, config, header, sorted) = prepare_sources(ROWS, sources);
        let output = dir.path().join("merged.csv");
        let combiner = MergeCombiner::new(&config);

        group.bench_with_input(BenchmarkId::from_parameter(sources), &sorted, |b, sorted| {
            b.iter(|| black_box(combiner.merge(sorted, &header, &output).unwrap()));
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let content = dataset(ROWS);
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);

    for width in [1, 4, 10] {
        group.bench_with_input(BenchmarkId::new("max_parallel", width), &width, |b, &width| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    let input = dir.path().join("data.csv");
                    std::fs::write(&input, &content).unwrap();
                    let config = PipelineConfig {
                        chunk_size_bytes: 64 * 1024,
                        max_parallel: width,
                        output_file: dir.path().join("output.csv"),
                        ..PipelineConfig::with_work_dir(dir.path().join("work"))
                    };
                    (dir, input, config)
                },
                |(_dir, input, config)| {
                    rt.block_on(async {
                        let pipeline = Pipeline::new(config).unwrap();
                        black_box(pipeline.run(&input).await.unwrap())
                    })
                },
                BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

fn bench_hash(c: &mut Criterion) {
    c.bench_function("fnv1a_64 key", |b| {
        b.iter(|| black_box(fnv1a_64(black_box(b"region-12:store-345:sku-6789"))))
    });
}

criterion_group!(benches, bench_merge, bench_pipeline, bench_hash);
criterion_main!(benches);
