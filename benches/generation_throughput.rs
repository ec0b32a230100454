//! Generation throughput benchmarks.
//!
//! Measures the generate loop, stop scanning and snapshot encoding over a
//! vocabulary-only model, so only engine overhead is timed.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ember_core::config::EngineSettings;
use ember_core::engine::{
    ContextSnapshot, GenerationConfig, ModelHandle, SamplingParams, StopState, TokenId,
};
use ember_core::models::{VocabBackend, VocabSpec};

const PIECES: &[&str] = &["<unk>", "<s>", "</s>", " the", " quick", " brown", " fox", " jumps", "."];

fn backend() -> Arc<VocabBackend> {
    let spec = VocabSpec {
        name: "bench".to_string(),
        tokens: PIECES.iter().map(|s| s.to_string()).collect(),
        bos: 1,
        eos: 2,
        unk: 0,
        max_sequence_length: 8192,
    };
    Arc::new(VocabBackend::from_spec(spec).expect("bench vocabulary"))
}

/// Never samples EOS, so every run generates exactly `max_tokens`.
fn cycling_sampler(_logits: &[f32], params: &SamplingParams, recent: &[TokenId]) -> TokenId {
    let last = recent.last().copied().unwrap_or(0) as u64;
    3 + ((last + params.seed) % 6) as TokenId
}

fn bench_completion(c: &mut Criterion) {
    let mut group = c.benchmark_group("completion");
    let settings = EngineSettings { n_ctx: 4096, ..EngineSettings::default() };

    for count in [16usize, 128, 512] {
        let handle = ModelHandle::builder(backend())
            .settings(settings.clone())
            .sampler(cycling_sampler)
            .build()
            .expect("bench handle");
        let config = GenerationConfig::new().max_tokens(count).seed(1);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(BenchmarkId::new("buffered", count), |b| {
            b.iter(|| handle.create_completion(black_box(" the quick"), &config).expect("completion"))
        });
        group.bench_function(BenchmarkId::new("streamed", count), |b| {
            b.iter(|| {
                for item in handle.create_completion_stream(black_box(" the quick"), &config).expect("stream") {
                    black_box(item.expect("fragment"));
                }
            })
        });
    }

    group.finish();
}

fn bench_stop_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("stop_scan");
    let text = " the quick brown fox jumps".repeat(40);
    let bytes = text.as_bytes();

    for n_stops in [1usize, 4, 16] {
        let stops: Vec<String> = (0..n_stops).map(|i| format!("<|end{}|>", i)).collect();
        let state = StopState::new(&stops).expect("stop sequences");
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_function(BenchmarkId::new("sequences", n_stops), |b| {
            b.iter(|| state.scan(black_box(bytes), 0))
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for n_tokens in [256usize, 2048] {
        let snapshot = ContextSnapshot {
            fingerprint: 7,
            n_ctx: 4096,
            tokens: (0..n_tokens as TokenId).collect(),
            logits: vec![0.5; 32_000],
            cache: Some(vec![0u8; n_tokens * 64]),
        };
        let bytes = snapshot.encode();

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_function(BenchmarkId::new("encode", n_tokens), |b| {
            b.iter(|| black_box(&snapshot).encode())
        });
        group.bench_function(BenchmarkId::new("decode", n_tokens), |b| {
            b.iter(|| ContextSnapshot::decode(black_box(&bytes)).expect("decode"))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_completion, bench_stop_scan, bench_snapshot);
criterion_main!(benches);
