use anyhow::Result;
use bytes::Bytes;
use futures::stream;
use ridelane::error::StreamError;
use ridelane::frame_slot::LatestFrameSlot;
use ridelane::stream::{pump, MjpegParser, PumpOptions, ReaderStats, StreamEnd, StreamFormat};
use std::time::Duration;
use tokio::sync::watch;

fn tiny_jpeg(index: u32) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];
    data.extend(index.to_be_bytes().iter().map(|b| b & 0x7F));
    data.extend([0xFF, 0xD9]);
    data
}

fn options(drain_threshold: usize) -> PumpOptions {
    PumpOptions {
        drain_threshold,
        read_timeout: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn test_thousand_frames_without_consumer() -> Result<()> {
    let frames: Vec<Vec<u8>> = (0..1000).map(tiny_jpeg).collect();
    let last = frames[999].clone();
    let chunks = frames
        .into_iter()
        .map(|f| Ok::<_, StreamError>(Bytes::from(f)));

    let slot = LatestFrameSlot::new();
    let stats = ReaderStats::default();
    let mut parser = MjpegParser::new(StreamFormat::RawJpeg, 3_000_000);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    let end = pump(
        stream::iter(chunks),
        &mut parser,
        &slot,
        options(16 * 1024),
        &stats,
        &mut shutdown,
    )
    .await?;
    assert_eq!(end, StreamEnd::EndOfStream);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.frames + snapshot.superseded, 1000);
    assert!(parser.buffered() <= 16 * 1024);

    let slot_stats = slot.stats();
    assert_eq!(slot_stats.published, snapshot.frames);
    assert_eq!(slot_stats.dropped, snapshot.frames - 1);

    let held = slot.try_take().expect("slot should hold the newest frame");
    assert_eq!(held.data.as_ref(), last.as_slice());
    assert!(slot.try_take().is_none());
    Ok(())
}

#[tokio::test]
async fn test_backlog_over_threshold_is_drained() -> Result<()> {
    let frames: Vec<Vec<u8>> = (0..20u8)
        .map(|i| {
            let mut data = vec![0xFF, 0xD8];
            data.extend(std::iter::repeat(i).take(996));
            data.extend([0xFF, 0xD9]);
            data
        })
        .collect();
    let last = frames[19].clone();
    let chunks = frames
        .into_iter()
        .map(|f| Ok::<_, StreamError>(Bytes::from(f)));

    let slot = LatestFrameSlot::new();
    let stats = ReaderStats::default();
    let mut parser = MjpegParser::new(StreamFormat::RawJpeg, 3_000_000);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    pump(
        stream::iter(chunks),
        &mut parser,
        &slot,
        options(4096),
        &stats,
        &mut shutdown,
    )
    .await?;

    let snapshot = stats.snapshot();
    assert!(snapshot.drained_bytes > 0);
    assert!(snapshot.drained_bytes <= 19 * 1000);
    assert!(parser.buffered() <= 4096);

    let held = slot.try_take().expect("newest frame should survive the drain");
    assert_eq!(held.data.as_ref(), last.as_slice());
    Ok(())
}

#[tokio::test]
async fn test_frames_larger_than_threshold_still_arrive() -> Result<()> {
    // 40 KB frames in 8 KB chunks against a 16 KiB threshold
    let frames: Vec<Vec<u8>> = (0..30u8)
        .map(|i| {
            let mut data = vec![0xFF, 0xD8];
            data.extend(std::iter::repeat(i + 1).take(39_996));
            data.extend([0xFF, 0xD9]);
            data
        })
        .collect();
    let last = frames[29].clone();
    let bytes: Vec<u8> = frames.concat();
    let chunks: Vec<Result<Bytes, StreamError>> = bytes
        .chunks(8000)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    let slot = LatestFrameSlot::new();
    let stats = ReaderStats::default();
    let mut parser = MjpegParser::new(StreamFormat::RawJpeg, 3_000_000);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    let end = pump(
        stream::iter(chunks),
        &mut parser,
        &slot,
        options(16 * 1024),
        &stats,
        &mut shutdown,
    )
    .await?;
    assert_eq!(end, StreamEnd::EndOfStream);

    let snapshot = stats.snapshot();
    assert!(snapshot.frames >= 1);
    assert!(snapshot.drained_bytes > 0);
    assert_eq!(snapshot.malformed, 0);
    assert_eq!(snapshot.oversized, 0);

    let held = slot.try_take().expect("newest large frame should reach the slot");
    assert_eq!(held.data.as_ref(), last.as_slice());
    Ok(())
}

#[tokio::test]
async fn test_large_frames_with_odd_chunking() -> Result<()> {
    let frames: Vec<Vec<u8>> = (0..12u8)
        .map(|i| {
            let mut data = vec![0xFF, 0xD8];
            data.extend(std::iter::repeat(i + 1).take(25_000));
            data.extend([0xFF, 0xD9]);
            data
        })
        .collect();
    let last = frames[11].clone();
    let bytes: Vec<u8> = frames.concat();
    let chunks: Vec<Result<Bytes, StreamError>> = bytes
        .chunks(3001)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    let slot = LatestFrameSlot::new();
    let stats = ReaderStats::default();
    let mut parser = MjpegParser::new(StreamFormat::RawJpeg, 3_000_000);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    pump(
        stream::iter(chunks),
        &mut parser,
        &slot,
        options(4096),
        &stats,
        &mut shutdown,
    )
    .await?;

    let held = slot.try_take().expect("newest frame should reach the slot");
    assert_eq!(held.data.as_ref(), last.as_slice());
    assert_eq!(parser.buffered(), 0);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_before_read() -> Result<()> {
    let slot = LatestFrameSlot::new();
    let stats = ReaderStats::default();
    let mut parser = MjpegParser::new(StreamFormat::RawJpeg, 3_000_000);
    let (shutdown_tx, mut shutdown) = watch::channel(false);

    let pending = stream::pending::<Result<Bytes, StreamError>>();
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = shutdown_tx.send(true);
    };

    let (end, _) = tokio::join!(
        pump(pending, &mut parser, &slot, options(16 * 1024), &stats, &mut shutdown),
        stopper
    );
    assert_eq!(end?, StreamEnd::Cancelled);
    assert!(!slot.is_pending());
    Ok(())
}

#[tokio::test]
async fn test_read_timeout() {
    let slot = LatestFrameSlot::new();
    let stats = ReaderStats::default();
    let mut parser = MjpegParser::new(StreamFormat::RawJpeg, 3_000_000);
    let (_shutdown_tx, mut shutdown) = watch::channel(false);

    let result = pump(
        stream::pending::<Result<Bytes, StreamError>>(),
        &mut parser,
        &slot,
        PumpOptions {
            drain_threshold: 16 * 1024,
            read_timeout: Duration::from_millis(50),
        },
        &stats,
        &mut shutdown,
    )
    .await;

    assert!(matches!(result, Err(StreamError::ReadTimeout(50))));
}
