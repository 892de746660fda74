use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::Cursor;
use std::time::Duration;
use tilecast::segmenter::{ImageSegmenter, SourceImage};
use tilecast::types::{Event, EventType, PixelFormat, RowOrder, SizeHints, View};
use tilecast::wire::header::MessageType;
use tilecast::wire::{MessageHeader, SegmentParameters};

fn sample_header() -> MessageHeader {
    MessageHeader::new(MessageType::Tile, 4096, "wall").unwrap()
}

fn sample_segment_parameters() -> SegmentParameters {
    SegmentParameters { format: PixelFormat::Rgba, x: 0, y: 0, width: 512, height: 512 }
}

fn sample_size_hints() -> SizeHints {
    SizeHints {
        min_width: 320,
        min_height: 240,
        max_width: 1920,
        max_height: 1080,
        preferred_width: 1280,
        preferred_height: 720,
    }
}

fn sample_event() -> Event {
    Event {
        event_type: EventType::Move,
        mouse_x: 0.5,
        mouse_y: 0.5,
        dx: 0.01,
        dy: -0.01,
        mouse_left: true,
        mouse_right: false,
        mouse_middle: false,
        key: 0,
        modifiers: 0,
        text: [0u8; 16],
    }
}

fn sample_image(width: u32, height: u32) -> SourceImage {
    SourceImage {
        data: vec![128u8; (width * height * 4) as usize].into(),
        width,
        height,
        format: PixelFormat::Rgba,
        x: 0,
        y: 0,
        view: View::Mono,
        row_order: RowOrder::TopDown,
        channel: 0,
    }
}

fn bench_header_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_codec");
    group.measurement_time(Duration::from_secs(10));

    let header = sample_header();
    group.bench_function("encode", |b| {
        b.iter(|| {
            let mut buf = BytesMut::new();
            black_box(&header).encode(&mut buf);
            buf
        })
    });

    let mut encoded = BytesMut::new();
    header.encode(&mut encoded);
    let encoded = encoded.freeze();
    group.bench_function("decode", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(encoded.as_ref()));
            MessageHeader::decode(&mut cursor).unwrap()
        })
    });

    group.finish();
}

fn bench_body_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_codec");
    group.measurement_time(Duration::from_secs(10));

    let params = sample_segment_parameters();
    group.bench_function("segment_parameters_encode", |b| {
        b.iter(|| {
            let mut buf = BytesMut::new();
            black_box(&params).encode(&mut buf);
            buf
        })
    });

    let mut params_bytes = BytesMut::new();
    params.encode(&mut params_bytes);
    let params_bytes = params_bytes.freeze();
    group.bench_function("segment_parameters_decode", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(params_bytes.as_ref()));
            SegmentParameters::decode(&mut cursor).unwrap()
        })
    });

    let hints = sample_size_hints();
    group.bench_function("size_hints_encode", |b| {
        b.iter(|| {
            let mut buf = BytesMut::new();
            black_box(&hints).encode(&mut buf);
            buf
        })
    });

    let event = sample_event();
    group.bench_function("event_encode", |b| {
        b.iter(|| {
            let mut buf = BytesMut::new();
            black_box(&event).encode(&mut buf);
            buf
        })
    });

    let mut event_bytes = BytesMut::new();
    event.encode(&mut event_bytes);
    let event_bytes = event_bytes.freeze();
    group.bench_function("event_decode", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(event_bytes.as_ref()));
            Event::decode(&mut cursor).unwrap()
        })
    });

    group.finish();
}

fn bench_segmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmentation");
    group.measurement_time(Duration::from_secs(10));

    let whole = ImageSegmenter::new();
    group.bench_function("single_tile_1920x1080", |b| {
        let image = sample_image(1920, 1080);
        b.iter(|| whole.generate_raw(black_box(&image)).unwrap())
    });

    let mut tiled = ImageSegmenter::new();
    tiled.set_nominal_segment_dimensions(256, 256);
    group.bench_function("256_tiles_1920x1080", |b| {
        let image = sample_image(1920, 1080);
        b.iter(|| tiled.generate_raw(black_box(&image)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_header_codec, bench_body_codec, bench_segmentation);
criterion_main!(benches);
