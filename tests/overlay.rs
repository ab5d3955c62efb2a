use image::{Rgb, RgbImage};
use ridelane::config::OverlayConfig;
use ridelane::lane::LaneSpan;
use ridelane::overlay::{OverlayRenderer, Projection};
use ridelane::track::LaneModel;

fn projection() -> Projection {
    Projection {
        span: LaneSpan {
            y_top: 126.0,
            y_bottom: 360.0,
        },
        scale_x: 2.0,
        scale_y: 2.0,
        full_width: 1280,
        full_height: 720,
    }
}

fn vertical(x: f64) -> LaneModel {
    LaneModel {
        slope: 0.0,
        intercept: x,
    }
}

#[test]
fn test_polyline_steps_and_scale() {
    let renderer = OverlayRenderer::new(&OverlayConfig::default());
    let overlay = renderer.render(Some(vertical(200.0)), None, &projection());

    assert!(overlay.right.is_none());
    let left = overlay.left.expect("left polyline");
    assert_eq!(left.points.len(), 17);
    assert_eq!(left.segments().count(), 16);

    assert_eq!(left.points[0], [400.0, 252.0]);
    assert_eq!(left.points[16], [400.0, 719.0]);
    for pair in left.points.windows(2) {
        assert!(pair[1][1] >= pair[0][1]);
    }
}

#[test]
fn test_polyline_follows_slope() {
    let renderer = OverlayRenderer::new(&OverlayConfig::default());
    let model = LaneModel {
        slope: -0.5,
        intercept: 400.0,
    };
    let overlay = renderer.render(None, Some(model), &projection());
    let right = overlay.right.expect("right polyline");

    // x = -0.5 * y + 400 at y = 126 and at y = 360, doubled.
    assert!((right.points[0][0] - 674.0).abs() < 1e-3);
    assert!((right.points[16][0] - 440.0).abs() < 1e-3);
}

#[test]
fn test_points_are_clamped() {
    let renderer = OverlayRenderer::new(&OverlayConfig::default());
    let overlay = renderer.render(Some(vertical(-50.0)), Some(vertical(5000.0)), &projection());

    let left = overlay.left.expect("left");
    let right = overlay.right.expect("right");
    assert!(left.points.iter().all(|p| p[0] == 0.0));
    assert!(right.points.iter().all(|p| p[0] == 1279.0));
    assert!(left.points.iter().all(|p| p[1] >= 0.0 && p[1] <= 719.0));
}

#[test]
fn test_absent_models() {
    let renderer = OverlayRenderer::new(&OverlayConfig::default());
    let overlay = renderer.render(None, None, &projection());
    assert!(overlay.is_empty());
    assert_eq!(overlay.polylines().count(), 0);
}

#[test]
fn test_composite_draws_thick_line() {
    let config = OverlayConfig::default();
    let renderer = OverlayRenderer::new(&config);
    let overlay = renderer.render(Some(vertical(200.0)), None, &projection());

    let mut frame = RgbImage::new(1280, 720);
    renderer.composite(&overlay, &mut frame);

    let green = Rgb(config.line_color);
    let row: Vec<u32> = (0..1280).filter(|&x| *frame.get_pixel(x, 500) == green).collect();
    assert_eq!(row.len(), config.line_thickness as usize);
    assert!(row.iter().all(|&x| (398..=402).contains(&x)));

    // Nothing above the ROI.
    assert!((0..1280).all(|x| *frame.get_pixel(x, 100) != green));
}
