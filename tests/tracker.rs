use ridelane::config::TrackerConfig;
use ridelane::lane::{LaneMeasurement, LaneSpan, SideMeasurement};
use ridelane::track::{AlphaBetaFilter, LaneTracker, Track};

const WIDTH: f64 = 640.0;
const SPAN: LaneSpan = LaneSpan {
    y_top: 126.0,
    y_bottom: 360.0,
};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_missing_measurement_holds_state() {
    let filter = AlphaBetaFilter::default();
    assert_eq!(filter.update(None, &SideMeasurement::MISSING, WIDTH, SPAN), None);

    let track = Track {
        x_bottom: 210.0,
        x_top: 250.0,
        v_bottom: 1.5,
        v_top: -0.5,
    };
    let half_missing = SideMeasurement::new(220.0, f64::NAN);
    assert_eq!(filter.update(Some(track), &SideMeasurement::MISSING, WIDTH, SPAN), Some(track));
    assert_eq!(filter.update(Some(track), &half_missing, WIDTH, SPAN), Some(track));
}

#[test]
fn test_first_measurement_initialises_track() {
    let filter = AlphaBetaFilter::default();
    let track = filter
        .update(None, &SideMeasurement::new(200.0, 240.0), WIDTH, SPAN)
        .expect("track");
    assert_eq!(track, Track::new(200.0, 240.0));
    assert_eq!(track.v_bottom, 0.0);
    assert_eq!(track.v_top, 0.0);
}

#[test]
fn test_bottom_step_is_clamped() {
    let filter = AlphaBetaFilter::from(&TrackerConfig {
        max_slope_delta: 1e9,
        ..TrackerConfig::default()
    });
    let prev = Track::new(300.0, 300.0);

    let right = filter
        .update(Some(prev), &SideMeasurement::new(400.0, 400.0), WIDTH, SPAN)
        .expect("track");
    assert!(close(right.x_bottom, 325.6));

    let left = filter
        .update(Some(prev), &SideMeasurement::new(200.0, 200.0), WIDTH, SPAN)
        .expect("track");
    assert!(close(left.x_bottom, 274.4));

    // Velocity is still driven by the full residual.
    assert!(close(right.v_bottom, 15.0));
}

#[test]
fn test_small_step_is_not_clamped() {
    let filter = AlphaBetaFilter::default();
    let prev = Track::new(300.0, 300.0);
    let next = filter
        .update(Some(prev), &SideMeasurement::new(310.0, 310.0), WIDTH, SPAN)
        .expect("track");
    assert!(close(next.x_bottom, 303.5));
    assert!(close(next.x_top, 303.5));
    assert!(close(next.v_bottom, 1.5));
}

#[test]
fn test_slope_change_is_clamped() {
    let filter = AlphaBetaFilter::default();
    let height = SPAN.height();
    let prev = Track::new(300.0, 300.0);

    // Top measurement chosen so the unclamped slope would move by 0.01.
    let top = 300.0 - 0.01 * height / 0.35;
    let next = filter
        .update(Some(prev), &SideMeasurement::new(300.0, top), WIDTH, SPAN)
        .expect("track");

    assert!(close(next.x_bottom, 300.0));
    assert!(close(next.slope(SPAN), 0.0018));
    assert!(close(next.x_top, 300.0 - 0.0018 * height));
}

#[test]
fn test_slope_clamp_after_step_clamp() {
    let filter = AlphaBetaFilter::default();
    let height = SPAN.height();
    let prev = Track::new(300.0, 300.0);

    let next = filter
        .update(Some(prev), &SideMeasurement::new(400.0, 300.0), WIDTH, SPAN)
        .expect("track");

    assert!(close(next.x_bottom, 325.6));
    assert!(close(next.slope(SPAN), 0.0018));
    assert!(close(next.x_top, 325.6 - 0.0018 * height));
}

#[test]
fn test_converges_on_constant_measurement() {
    let filter = AlphaBetaFilter::default();
    let mut track = filter.update(None, &SideMeasurement::new(190.0, 190.0), WIDTH, SPAN);
    let target = SideMeasurement::new(200.0, 200.0);
    for _ in 0..200 {
        track = filter.update(track, &target, WIDTH, SPAN);
    }

    let track = track.expect("track");
    assert!((track.x_bottom - 200.0).abs() < 1e-6);
    assert!((track.x_top - 200.0).abs() < 1e-6);
    assert!(track.v_bottom.abs() < 1e-6);
    assert!(track.v_top.abs() < 1e-6);
}

#[test]
fn test_lane_tracker_models() {
    let mut tracker = LaneTracker::new(&TrackerConfig::default());
    assert_eq!(tracker.models(), (None, None));

    let measurement = LaneMeasurement {
        left: SideMeasurement::new(180.0, 240.0),
        right: SideMeasurement::MISSING,
        y_top: SPAN.y_top,
        y_bottom: SPAN.y_bottom,
    };
    tracker.update(&measurement, WIDTH);

    let (left, right) = tracker.models();
    let left = left.expect("left model");
    assert!(right.is_none());
    assert!(close(left.x_at(SPAN.y_bottom), 180.0));
    assert!(close(left.x_at(SPAN.y_top), 240.0));

    // A frame with nothing detected keeps the model.
    tracker.update(&LaneMeasurement::missing(SPAN.y_top, SPAN.y_bottom), WIDTH);
    assert_eq!(tracker.models().0, Some(left));

    tracker.reset();
    assert!(tracker.left().is_none());
    assert_eq!(tracker.models(), (None, None));
}
