use criterion::{black_box, criterion_group, criterion_main, Criterion};

use foxhole::archive::{read_archive, write_archive, ArchiveEntry, Format};

fn sample_site(files: usize, file_size: usize) -> Vec<ArchiveEntry> {
    (0..files)
        .map(|i| {
            let content: Vec<u8> = (0..file_size).map(|b| ((b + i) % 251) as u8).collect();
            ArchiveEntry::file(format!("/assets/file-{i:04}.bin"), content)
        })
        .collect()
}

fn bench_codec(c: &mut Criterion) {
    let entries = sample_site(100, 4096);

    for format in [Format::Bin, Format::Odc, Format::Newc] {
        c.bench_function(&format!("encode_{format:?}"), |b| {
            b.iter(|| {
                let mut buf = Vec::with_capacity(512 * 1024);
                write_archive(&mut buf, format, black_box(&entries)).unwrap();
                buf
            })
        });

        let mut encoded = Vec::new();
        write_archive(&mut encoded, format, &entries).unwrap();
        c.bench_function(&format!("decode_{format:?}"), |b| {
            b.iter(|| read_archive(black_box(encoded.as_slice())).unwrap())
        });
    }
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
