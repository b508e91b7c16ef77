//! Bundle assembly throughput against the in-memory blobstore

use blobyard_common::{Digest, FileMode, Fingerprint};
use blobyard_stash::{BundleRequest, CancelSignal, Stash, StashConfig};
use blobyard_store::{BlobBody, Blobstore, MemoryBlobstore};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

async fn seed(store: &MemoryBlobstore, files: usize, file_size: usize) -> Vec<Fingerprint> {
    let mut fingerprints = Vec::with_capacity(files);
    for i in 0..files {
        let content: Vec<u8> = (0..file_size).map(|b| ((b + i) % 251) as u8).collect();
        let digest = Digest::of(&content);
        let body: BlobBody = Box::pin(std::io::Cursor::new(content));
        store.put(digest.as_str(), body).await.unwrap();
        fingerprints.push(Fingerprint::new(digest, format!("src/file_{i}.rb"), FileMode::default()).unwrap());
    }
    fingerprints
}

fn bench_assemble(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("assemble");

    for (files, file_size) in [(100, 1024), (1000, 128), (10, 1024 * 1024)] {
        let store = Arc::new(MemoryBlobstore::new());
        let fingerprints = rt.block_on(seed(&store, files, file_size));
        let stash = Stash::new(store, StashConfig::default());

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{files}x{file_size}B")),
            &fingerprints,
            |b, fingerprints| {
                b.to_async(&rt).iter(|| async {
                    let bundle = stash
                        .assemble(BundleRequest::new(fingerprints.clone()), &CancelSignal::new())
                        .await
                        .unwrap();
                    black_box(bundle.size())
                });
            },
        );
    }

    group.finish();
}

fn bench_missing(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = Arc::new(MemoryBlobstore::new());
    let fingerprints = rt.block_on(seed(&store, 1000, 16));
    let stash = Stash::new(store, StashConfig::default());

    let mut candidates: Vec<Digest> = fingerprints.iter().map(|f| f.digest().clone()).collect();
    candidates.extend((0..1000u32).map(|i| Digest::of(&i.to_be_bytes())));

    c.bench_function("missing_2000_candidates", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(stash.missing(candidates.clone()).await.unwrap())
        });
    });
}

criterion_group!(benches, bench_assemble, bench_missing);
criterion_main!(benches);
