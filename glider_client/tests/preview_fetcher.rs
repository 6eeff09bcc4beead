mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use glider::model::{EvolutionParams, Vehicle};
use glider::store::Store;
use glider_client::preview::DEFAULT_QUIET_PERIOD;
use glider_client::PreviewFetcher;
use tokio::time::sleep;

fn setup() -> (Arc<FakeService>, Store, PreviewFetcher) {
    let service = Arc::new(FakeService::new());
    // No geometry: the initial vehicle never triggers a render.
    let store = Store::new(Vehicle::default(), EvolutionParams::default());
    let fetcher = PreviewFetcher::spawn(service.clone(), store.clone(), DEFAULT_QUIET_PERIOD);
    (service, store, fetcher)
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_collapse_into_one_request_for_the_last_value() {
    let (service, store, _fetcher) = setup();

    store.set_vehicle(glider(1.0));
    sleep(ms(100)).await;
    store.set_vehicle(glider(2.0));
    sleep(ms(100)).await;
    store.set_vehicle(glider(3.0));

    sleep(ms(499)).await;
    assert!(service.preview_calls().is_empty());

    sleep(ms(10)).await;
    assert_eq!(service.preview_calls(), vec![glider(3.0)]);
    assert!(store.preview().loading);

    sleep(ms(100)).await;
    let preview = store.preview();
    assert_eq!(preview.image, Some(image_for(&glider(3.0))));
    assert!(!preview.loading);
    assert!(preview.error.is_none());
    assert_eq!(service.preview_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn superseded_request_is_cancelled_and_never_applied() {
    let (service, store, _fetcher) = setup();
    service.previews.lock().unwrap().extend([Reply::ok(2_000, ()), Reply::ok(10, ())]);

    store.set_vehicle(glider(1.0));
    sleep(ms(600)).await;
    assert_eq!(service.preview_calls().len(), 1);

    // Supersede the slow render while it is still in flight.
    store.set_vehicle(glider(2.0));
    sleep(ms(3_000)).await;

    assert_eq!(service.preview_calls(), vec![glider(1.0), glider(2.0)]);
    // The first render was torn down, not merely ignored.
    assert_eq!(service.previews_completed.load(Ordering::SeqCst), 1);
    let preview = store.preview();
    assert_eq!(preview.image, Some(image_for(&glider(2.0))));
    assert!(preview.error.is_none());
    assert!(!preview.loading);
}

#[tokio::test(start_paused = true)]
async fn failure_keeps_input_and_retry_reissues_immediately() {
    let (service, store, fetcher) = setup();
    service
        .previews
        .lock()
        .unwrap()
        .extend([Reply::status(20, 500, "Internal Server Error"), Reply::ok(20, ())]);

    store.set_vehicle(glider(4.0));
    sleep(ms(600)).await;

    let preview = store.preview();
    assert!(!preview.loading);
    let error = preview.error.clone().unwrap();
    assert!(error.contains("500"), "{}", error);
    assert_eq!(preview.retry_input(), Some(&glider(4.0)));
    assert!(preview.image.is_none());

    fetcher.retry();
    sleep(ms(30)).await;
    assert_eq!(service.preview_calls(), vec![glider(4.0), glider(4.0)]);
    let preview = store.preview();
    assert!(preview.error.is_none());
    assert_eq!(preview.image, Some(image_for(&glider(4.0))));
}

#[tokio::test(start_paused = true)]
async fn vehicle_without_geometry_makes_no_request() {
    let (service, store, _fetcher) = setup();
    service
        .previews
        .lock()
        .unwrap()
        .push_back(Reply::status(20, 502, "Bad Gateway"));

    store.set_vehicle(glider(5.0));
    sleep(ms(600)).await;
    assert!(store.preview().error.is_some());

    store.set_vehicle(Vehicle {
        mass_kg: Some(5.0),
        ..Vehicle::default()
    });
    sleep(ms(600)).await;

    assert_eq!(service.preview_calls().len(), 1);
    let preview = store.preview();
    assert!(preview.error.is_none());
    assert!(!preview.loading);
}

#[tokio::test(start_paused = true)]
async fn repeating_the_rendered_vehicle_is_not_a_new_edit() {
    let (service, store, _fetcher) = setup();

    store.set_vehicle(glider(6.0));
    sleep(ms(600)).await;
    store.set_vehicle(glider(6.0));
    sleep(ms(600)).await;

    assert_eq!(service.preview_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_the_in_flight_render_without_error() {
    let (service, store, fetcher) = setup();
    service.previews.lock().unwrap().push_back(Reply::ok(5_000, ()));

    store.set_vehicle(glider(7.0));
    sleep(ms(600)).await;
    assert!(store.preview().loading);

    fetcher.shutdown().await;
    sleep(ms(10)).await;

    let preview = store.preview();
    assert!(!preview.loading);
    assert!(preview.error.is_none());
    assert_eq!(service.previews_completed.load(Ordering::SeqCst), 0);

    // No longer subscribed.
    store.set_vehicle(glider(8.0));
    sleep(ms(600)).await;
    assert_eq!(service.preview_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_during_quiet_period_renders_the_newer_edit() {
    let (service, store, fetcher) = setup();
    service
        .previews
        .lock()
        .unwrap()
        .extend([Reply::status(20, 500, "Internal Server Error"), Reply::ok(20, ())]);

    store.set_vehicle(glider(1.0));
    sleep(ms(600)).await;
    assert!(store.preview().error.is_some());

    // The edit makes the failure for the old vehicle moot.
    store.set_vehicle(glider(2.0));
    sleep(ms(10)).await;
    let preview = store.preview();
    assert!(preview.error.is_none());
    assert!(preview.retry_input().is_none());

    fetcher.retry();
    sleep(ms(40)).await;
    assert_eq!(service.preview_calls(), vec![glider(1.0), glider(2.0)]);
    assert_eq!(store.preview().image, Some(image_for(&glider(2.0))));

    // The quiet period that the retry cut short issues nothing more.
    sleep(ms(1_000)).await;
    assert_eq!(service.preview_calls().len(), 2);
    assert_eq!(store.preview().image, Some(image_for(&glider(2.0))));
}

#[tokio::test(start_paused = true)]
async fn configured_quiet_period_drives_the_fetcher() {
    let config = glider_client::ClientConfig {
        preview_debounce_ms: 200,
        ..Default::default()
    };
    let service = Arc::new(FakeService::new());
    let store = Store::new(Vehicle::default(), EvolutionParams::default());
    let _fetcher = PreviewFetcher::spawn(service.clone(), store.clone(), config.preview_debounce());

    store.set_vehicle(glider(3.0));
    sleep(ms(190)).await;
    assert!(service.preview_calls().is_empty());
    sleep(ms(20)).await;
    assert_eq!(service.preview_calls(), vec![glider(3.0)]);
}
