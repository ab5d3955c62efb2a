use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use ridelane::config::{DetectorConfig, ProcessingConfig, RideLaneConfig};
use ridelane::decode::{DecodedFrame, FrameDecoder};
use ridelane::frame_slot::RawFrame;
use ridelane::lane::{ColumnProfileDetector, CorridorDetector, LaneDetector};
use ridelane::pipeline::FrameProcessor;
use ridelane::stream::{MjpegParser, StreamFormat};
use ridelane::synthetic::{encode_jpeg, SyntheticRoad};

fn noisy_road(width: u32, height: u32) -> image::RgbImage {
    let mut rng = thread_rng();
    let mut road = SyntheticRoad::straight(width, height, 200.0, 440.0);
    road.lines[0].0 += 60.0;
    road.lines[1].0 -= 60.0;
    road.render_noisy(&mut rng, 20)
}

fn bench_corridor_detector(c: &mut Criterion) {
    let frame = DecodedFrame::from_processing_image(noisy_road(640, 360), 1);
    let mut detector = CorridorDetector::new(DetectorConfig::default());

    c.bench_function("corridor_detect_640x360", |b| {
        b.iter(|| detector.detect(black_box(&frame)))
    });
}

fn bench_column_profile_detector(c: &mut Criterion) {
    let frame = DecodedFrame::from_processing_image(noisy_road(640, 360), 1);
    let mut detector = ColumnProfileDetector::new(&DetectorConfig::default());

    c.bench_function("column_profile_detect_640x360", |b| {
        b.iter(|| detector.detect(black_box(&frame)))
    });
}

fn bench_decode(c: &mut Criterion) {
    let jpeg = Bytes::from(encode_jpeg(&noisy_road(1280, 720), 80).unwrap());
    let raw = RawFrame::new(jpeg, 1);
    let mut decoder = FrameDecoder::new(&ProcessingConfig::default(), false);

    c.bench_function("decode_1280x720", |b| {
        b.iter(|| decoder.decode(black_box(&raw)).unwrap())
    });
}

fn bench_full_frame(c: &mut Criterion) {
    let jpeg = Bytes::from(encode_jpeg(&noisy_road(1280, 720), 80).unwrap());
    let raw = RawFrame::new(jpeg, 1);
    let mut processor = FrameProcessor::new(&RideLaneConfig::default());

    c.bench_function("process_raw_1280x720", |b| {
        b.iter(|| processor.process_raw(black_box(&raw)).unwrap())
    });
}

fn bench_parser(c: &mut Criterion) {
    let jpeg = encode_jpeg(&noisy_road(640, 360), 80).unwrap();
    let mut stream = Vec::new();
    for _ in 0..10 {
        stream.extend(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        stream.extend(&jpeg);
        stream.extend(b"\r\n");
    }

    c.bench_function("multipart_scan_10_frames", |b| {
        b.iter(|| {
            let mut parser = MjpegParser::new(
                StreamFormat::Multipart {
                    boundary: "frame".to_string(),
                },
                3_000_000,
            );
            let mut frames = 0;
            for chunk in stream.chunks(4096) {
                parser.feed(black_box(chunk));
                while parser.next_frame().is_some() {
                    frames += 1;
                }
            }
            frames
        })
    });
}

criterion_group!(
    benches,
    bench_corridor_detector,
    bench_column_profile_detector,
    bench_decode,
    bench_full_frame,
    bench_parser
);
criterion_main!(benches);
