use lockbox_crypto::{decrypt_stream, encrypt, encrypt_stream, SymmetricKey};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_stream(bencher: divan::Bencher, size: usize) {
    let rt = runtime();
    let key = SymmetricKey::from_bytes([0xAB; 32]);
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut out = Vec::with_capacity(size + 16);
            rt.block_on(encrypt_stream(
                divan::black_box(&key),
                &mut divan::black_box(&data[..]),
                &mut out,
            ))
            .unwrap();
            out
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_stream(bencher: divan::Bencher, size: usize) {
    let rt = runtime();
    let key = SymmetricKey::from_bytes([0xAB; 32]);
    let data = make_data(size);
    let mut encrypted = Vec::new();
    rt.block_on(encrypt_stream(&key, &mut &data[..], &mut encrypted))
        .unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut out = Vec::with_capacity(size);
            rt.block_on(decrypt_stream(
                divan::black_box(&key),
                &mut divan::black_box(&encrypted[..]),
                &mut out,
            ))
            .unwrap();
            out
        });
}

#[divan::bench]
fn bench_encrypt_marker() -> String {
    let key = SymmetricKey::from_bytes([0xAB; 32]);
    encrypt(divan::black_box(b"beaver"), &key).unwrap()
}

fn main() {
    divan::main();
}
