use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use walletvault::cipher::Cipher;
use walletvault::keystore::MemoryKeyStore;
use walletvault::manager::KeyManager;
use walletvault::payload::CipherSuite;

fn benchmark_seal_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("cipher");

    let keys = KeyManager::new(Arc::new(MemoryKeyStore::new()));
    let key = keys.get_or_create_key("bench").unwrap();

    let sizes = [("32B", 32), ("1KB", 1024), ("64KB", 64 * 1024)];

    for suite in [CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305] {
        let cipher = Cipher::new(suite);

        for (name, size) in sizes {
            let plaintext = vec![0u8; size];
            let sealed = cipher.encrypt(&key, &plaintext, Some(b"bench".as_slice())).unwrap();

            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("encrypt/{suite:?}"), name),
                &plaintext,
                |b, plaintext| {
                    b.iter(|| {
                        cipher
                            .encrypt(black_box(&key), black_box(plaintext), Some(b"bench".as_slice()))
                            .unwrap()
                    });
                },
            );
            group.bench_with_input(
                BenchmarkId::new(format!("decrypt/{suite:?}"), name),
                &sealed,
                |b, sealed| {
                    b.iter(|| {
                        cipher
                            .decrypt(black_box(&key), black_box(sealed), Some(b"bench".as_slice()))
                            .unwrap()
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_seal_open);
criterion_main!(benches);
