use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ricecoder_process::output::LineBuffer;
use ricecoder_process::reader::BUFFER_CAPACITY;

fn sample_output(lines: usize, width: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(lines * (width + 1));
    for n in 0..lines {
        let line = format!("{n:0width$}");
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
    }
    data
}

fn split_in_reader_chunks(data: &[u8]) -> usize {
    let mut buffer = LineBuffer::new();
    let mut count = 0;
    for chunk in data.chunks(BUFFER_CAPACITY) {
        buffer.extend(chunk);
        while let Some(line) = buffer.next_line() {
            black_box(line);
            count += 1;
        }
    }
    count + usize::from(buffer.finish().is_some())
}

fn benchmark_line_splitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_splitting");

    for width in [16usize, 256, 16 * 1024] {
        let data = sample_output(2_000, width);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &data, |b, data| {
            b.iter(|| split_in_reader_chunks(black_box(data)));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_line_splitting);
criterion_main!(benches);
