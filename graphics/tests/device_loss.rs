//! Device loss and reinitialization on the dummy backend.

mod common;

use std::time::Duration;

use vista_graphics::{GraphicsError, SubmissionFailure};

use common::{ORANGE_TEXEL, dummy, renderer, simple_scene, views};

fn is_lost_batch(result: &Result<Vec<vista_graphics::RenderedView>, GraphicsError>) -> bool {
    matches!(
        result,
        Err(GraphicsError::Submission {
            failure: SubmissionFailure::DeviceLost,
            ..
        })
    )
}

#[test]
fn test_device_loss_and_reinitialize() {
    let mut renderer = renderer();
    simple_scene(&mut renderer);

    dummy(&renderer).set_hold_completions(true);
    let first = renderer.submit_views(&views(3)).unwrap().remove(0);
    dummy(&renderer).simulate_device_loss();

    assert!(is_lost_batch(&renderer.wait_for_batch(first.id())));
    assert!(renderer.is_device_lost());

    // Batches submitted after the loss fail without reaching the device.
    let second = renderer.submit_views(&views(2)).unwrap().remove(0);
    assert!(is_lost_batch(&second.wait(Duration::from_millis(50))));

    renderer.reinitialize().unwrap();
    assert!(!renderer.is_device_lost());

    // Materials and lights are uploaded again to the new device.
    let third = renderer.submit_views(&views(2)).unwrap().remove(0);
    let rendered = renderer.wait_for_batch(third.id()).unwrap();
    assert_eq!(rendered.len(), 2);
    assert_eq!(&rendered[1].pixels[..4], &ORANGE_TEXEL);
    assert!(third.id() > second.id());

    let stats = renderer.stats();
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.batches_failed, 2);
    assert_eq!(stats.batches_completed, 1);
}

#[test]
fn test_reinitialize_fails_in_flight_batches() {
    let mut renderer = renderer();
    simple_scene(&mut renderer);

    dummy(&renderer).set_hold_completions(true);
    let future = renderer.submit_views(&views(3)).unwrap().remove(0);
    assert_eq!(renderer.in_flight_batches(), 1);

    renderer.reinitialize().unwrap();
    assert_eq!(renderer.in_flight_batches(), 0);
    assert!(is_lost_batch(&future.wait(Duration::from_millis(50))));
}

#[test]
fn test_submit_error_fails_only_its_batch() {
    let mut renderer = renderer();
    simple_scene(&mut renderer);

    dummy(&renderer).set_hold_completions(true);
    let in_flight = renderer.submit_views(&views(3)).unwrap().remove(0);

    dummy(&renderer).inject_submit_error(GraphicsError::Internal("queue rejected work".into()));
    let rejected = renderer.submit_views(&views(2)).unwrap().remove(0);
    assert!(matches!(
        rejected.wait(Duration::ZERO),
        Err(GraphicsError::Submission {
            failure: SubmissionFailure::Backend(_),
            ..
        })
    ));
    assert!(!in_flight.is_ready());
    assert!(!renderer.is_device_lost());

    dummy(&renderer).set_hold_completions(false);
    let rendered = renderer.wait_for_batch(in_flight.id()).unwrap();
    assert_eq!(rendered.len(), 3);
    for view in &rendered {
        assert_eq!(&view.pixels[..4], &ORANGE_TEXEL);
    }

    let stats = renderer.stats();
    assert_eq!(stats.batches_completed, 1);
    assert_eq!(stats.batches_failed, 1);
}
