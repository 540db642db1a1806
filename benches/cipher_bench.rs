use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use game_protocol::cipher::table::{DEFAULT_SEED, DEFAULT_TABLE};
use game_protocol::cipher::{shuffle, CipherAlgorithm, RollingCipher, TransformKind};

fn bench_shuffle(c: &mut Criterion) {
    c.bench_function("shuffle", |b| {
        let mut iv = [0x46, 0x72, 0x7A, 0x52];
        b.iter(|| {
            iv = shuffle(&DEFAULT_TABLE, &DEFAULT_SEED, black_box(&iv));
        })
    });
}

#[allow(clippy::unwrap_used)]
fn bench_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("rolling_transform");
    let payload_sizes = [16usize, 256, 1456, 4096, 65535];

    for kind in [TransformKind::Aes, TransformKind::AesWithLegacy] {
        let algorithm = CipherAlgorithm::standard(kind);
        for &size in &payload_sizes {
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_function(format!("{}_{size}b", kind.name()), |b| {
                let mut cipher =
                    RollingCipher::encryptor(algorithm.clone(), &[1, 2, 3, 4], 83).unwrap();
                b.iter_batched_ref(
                    || vec![0xA5u8; size],
                    |payload| cipher.transform(payload),
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_shuffle, bench_transform);
criterion_main!(benches);
