use bytes::Bytes;
use ridelane::frame_slot::{LatestFrameSlot, RawFrame};
use std::sync::Arc;
use std::time::Duration;

fn frame(index: u64) -> RawFrame {
    RawFrame::new(Bytes::from(vec![index as u8; 4]), index)
}

#[tokio::test]
async fn test_latest_wins() {
    let slot = LatestFrameSlot::new();
    slot.publish(frame(1));
    slot.publish(frame(2));
    slot.publish(frame(3));

    let taken = slot.take_latest().await;
    assert_eq!(taken.index, 3);

    let stats = slot.stats();
    assert_eq!(stats.published, 3);
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.taken, 1);
    assert!(!slot.is_pending());
}

#[tokio::test]
async fn test_take_waits_for_publish() {
    let slot = Arc::new(LatestFrameSlot::new());
    let producer = slot.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.publish(frame(7));
    });

    let taken = tokio::time::timeout(Duration::from_secs(2), slot.take_latest())
        .await
        .expect("frame should arrive");
    assert_eq!(taken.index, 7);
}

#[tokio::test]
async fn test_frame_is_delivered_once() {
    let slot = LatestFrameSlot::new();
    slot.publish(frame(1));
    assert_eq!(slot.take_latest().await.index, 1);

    let second = tokio::time::timeout(Duration::from_millis(50), slot.take_latest()).await;
    assert!(second.is_err());
}

#[test]
fn test_clear_discards_pending() {
    let slot = LatestFrameSlot::new();
    assert!(!slot.clear());
    slot.publish(frame(4));
    assert!(slot.is_pending());
    assert!(slot.clear());
    assert!(slot.try_take().is_none());
    assert_eq!(slot.stats().dropped, 1);
}
