//! Throughput of the tiny fixture model. Measures tokenization, batching
//! and the forward pass without touching the network.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use textembed::{testing, EmbeddingService};

fn documents(count: usize, words: usize) -> Vec<String> {
    const WORDS: &[&str] = &[
        "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "hello", "world",
        "text", "search",
    ];
    (0..count)
        .map(|i| {
            (0..words)
                .map(|j| WORDS[(i * 7 + j * 3) % WORDS.len()])
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn tiny_service(dir: &std::path::Path) -> EmbeddingService {
    let spec = testing::write_tiny_model(dir).expect("fixture model should be written");
    EmbeddingService::from_spec(spec, testing::tiny_options(dir)).expect("fixture model should load")
}

/// Benchmark a fixed corpus at different batch sizes
fn bench_batch_sizes(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = tiny_service(dir.path());
    let docs = documents(128, 24);

    let mut group = c.benchmark_group("embed_batch_size");
    group.throughput(Throughput::Elements(docs.len() as u64));
    for batch_size in [1i64, 8, 32, 128] {
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    service
                        .embed(black_box(&docs), batch_size)
                        .expect("embed should succeed")
                })
            },
        );
    }
    group.finish();
}

/// Benchmark document length, which drives padded width
fn bench_document_length(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = tiny_service(dir.path());

    let mut group = c.benchmark_group("embed_document_length");
    for words in [4usize, 32, 120] {
        let docs = documents(32, words);
        group.throughput(Throughput::Elements(docs.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(words), &docs, |b, docs| {
            b.iter(|| service.embed(black_box(docs), 32).expect("embed should succeed"))
        });
    }
    group.finish();
}

/// Mixed lengths with and without a token budget
fn bench_token_budget(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = testing::write_tiny_model(dir.path()).expect("fixture model should be written");
    let mut docs = documents(63, 6);
    docs.push(documents(1, 120).remove(0));

    let mut group = c.benchmark_group("embed_token_budget");
    group.throughput(Throughput::Elements(docs.len() as u64));
    for budget in [None, Some(1024usize)] {
        let options = testing::tiny_options(dir.path()).with_max_batch_tokens(budget);
        let service =
            EmbeddingService::from_spec(spec.clone(), options).expect("fixture model should load");
        let label = budget.map_or_else(|| "unbounded".to_string(), |b| b.to_string());
        group.bench_function(label, |b| {
            b.iter(|| service.embed(black_box(&docs), 0).expect("embed should succeed"))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_batch_sizes,
    bench_document_length,
    bench_token_budget
);
criterion_main!(benches);
