use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use realtime_protocol::core::codec::PackageCodec;
use realtime_protocol::core::package::{Package, PackageType};
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_package_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("package_encode_decode");
    let body_sizes = [0usize, 64, 512, 4096, 65536, 1024 * 1024];

    for &size in &body_sizes {
        let body = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || Package::new(PackageType::Data, vec![0u8; size]),
                |package| {
                    let mut buf = BytesMut::with_capacity(size + 4);
                    let mut codec = PackageCodec;
                    codec.encode(package, &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("decode_{size}b"), |b| {
            let bytes = Package::encode(PackageType::Data, &body).unwrap();
            b.iter(|| {
                let decoded = Package::from_bytes(&bytes);
                assert!(decoded.is_ok());
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_stream_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_framing");
    let mut wire = BytesMut::new();
    let mut codec = PackageCodec;
    for i in 0..256u32 {
        codec
            .encode(Package::new(PackageType::Data, vec![i as u8; 128]), &mut wire)
            .unwrap();
    }
    group.throughput(Throughput::Bytes(wire.len() as u64));

    group.bench_function("decode_256_packages", |b| {
        b.iter_batched(
            || wire.clone(),
            |mut buf| {
                let mut codec = PackageCodec;
                let mut count = 0;
                while let Some(_package) = codec.decode(&mut buf).unwrap() {
                    count += 1;
                }
                assert_eq!(count, 256);
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_package_encode_decode, bench_stream_framing);
criterion_main!(benches);
