use super::*;
use crate::{
    fake_transport::{device, device_id, remote_error, token, transport_error, Call, FakeTransport},
    session::SlotStatus,
};
use serde_json::json;
use std::time::Duration;

fn controller(fake: &Arc<FakeTransport>) -> Arc<DeviceSessionController> {
    let transport: Arc<dyn DeviceTransport> = fake.clone();
    DeviceSessionController::with_retry_policy(transport, RetryPolicy::no_retry())
}

async fn connected(fake: &Arc<FakeTransport>) -> Arc<DeviceSessionController> {
    let controller = controller(fake);
    controller.set_access_token(token()).await;
    controller.connect(device()).await;
    controller
}

fn pattern_fake() -> FakeTransport {
    FakeTransport::new().with_patterns(&["Rainbow", "Fire", "Noise"], 1)
}

#[tokio::test]
async fn connect_populates_every_field_and_the_pattern_list() {
    let fake = Arc::new(pattern_fake());
    let controller = controller(&fake);
    controller.set_access_token(token()).await;

    let session = controller.connect(device()).await;

    assert_eq!(session.device, Some(device()));
    assert!(session.power);
    assert_eq!(session.timezone_offset, -6);
    assert_eq!(session.brightness, 128);
    assert!(!session.clock_flipped);
    assert_eq!(session.color, Rgb::new(10, 20, 30));
    assert_eq!(session.noise.speed_x, 1);
    assert_eq!(session.noise.speed_y, 2);
    assert_eq!(session.noise.speed_z, 3);
    assert_eq!(session.noise.scale, 30);
    assert_eq!(session.patterns.len(), 3);
    assert_eq!(
        session.selected_pattern,
        Some(PatternEntry {
            index: 1,
            name: "Fire".into()
        })
    );
    assert!(session
        .slots
        .values()
        .all(|status| *status == SlotStatus::Ready));
    assert!(!session.is_busy());
    assert!(fake.violations().await.is_empty());
}

#[tokio::test]
async fn connect_reads_pattern_index_only_after_all_names() {
    let fake = Arc::new(pattern_fake().with_delay(Duration::from_millis(1)));
    connected(&fake).await;

    let calls = fake.calls().await;
    let index_read = calls
        .iter()
        .position(|call| *call == Call::read("patternIndex"))
        .expect("index read");
    let last_name = calls
        .iter()
        .rposition(|call| *call == Call::read("patternName"))
        .expect("name read");
    assert!(index_read > last_name);
}

#[tokio::test]
async fn connect_without_token_asks_for_one() {
    let fake = Arc::new(FakeTransport::new());
    let controller = controller(&fake);

    let session = controller.connect(device()).await;

    assert_eq!(session.status, "Please enter your access token.");
    assert!(session.device.is_none());
    assert!(fake.calls().await.is_empty());
}

#[tokio::test]
async fn one_failed_read_leaves_sibling_fields_intact() {
    let fake = Arc::new(pattern_fake().failing_read("brightness", 1, transport_error()));

    let controller = connected(&fake).await;
    let session = controller.snapshot().await;

    assert_eq!(
        session.slot_status(Slot::Field(Field::Brightness)),
        SlotStatus::Failed(transport_error().to_string())
    );
    assert_eq!(session.brightness, 0);
    for field in Field::ALL.into_iter().filter(|f| *f != Field::Brightness) {
        assert_eq!(
            session.slot_status(Slot::Field(field)),
            SlotStatus::Ready,
            "{field} should have loaded"
        );
    }
    assert_eq!(session.timezone_offset, -6);
    assert_eq!(session.color, Rgb::new(10, 20, 30));
    assert_eq!(session.patterns.len(), 3);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn failed_pattern_load_keeps_list_empty_and_skips_index_read() {
    let fake = Arc::new(pattern_fake().failing_pattern_name(2, transport_error()));

    let controller = connected(&fake).await;
    let session = controller.snapshot().await;

    assert!(session.patterns.is_empty());
    assert!(matches!(
        session.slot_status(Slot::PatternList),
        SlotStatus::Failed(_)
    ));
    assert_eq!(session.slot_status(Slot::ActivePattern), SlotStatus::Pending);
    assert!(!fake.calls().await.contains(&Call::read("patternIndex")));
    assert!(!session.is_busy());
}

#[tokio::test]
async fn set_field_keeps_the_echoed_value_not_the_requested_one() {
    let fake = Arc::new(pattern_fake());
    let controller = connected(&fake).await;

    let confirmed = controller
        .set_field(Field::Brightness, 300)
        .await
        .expect("set brightness");

    assert_eq!(confirmed, 255);
    let session = controller.snapshot().await;
    assert_eq!(session.brightness, 255);
    assert_eq!(session.status, "Brightness set");
    assert!(fake
        .calls()
        .await
        .contains(&Call::invoke("variable", "brt:300")));
}

#[tokio::test]
async fn set_color_sends_three_channel_writes() {
    let fake = Arc::new(pattern_fake());
    let controller = connected(&fake).await;

    let rgb = controller.set_color("#1a2b3c").await.expect("set colour");

    assert_eq!(rgb, Rgb::new(26, 43, 60));
    assert_eq!(controller.snapshot().await.color, Rgb::new(26, 43, 60));
    let calls = fake.calls().await;
    for args in ["r:26", "g:43", "b:60"] {
        assert!(calls.contains(&Call::invoke("variable", args)), "missing {args}");
    }
}

#[tokio::test]
async fn invalid_colour_sends_nothing() {
    let fake = Arc::new(pattern_fake());
    let controller = connected(&fake).await;
    let before = fake.calls().await.len();

    let err = controller.set_color("blue").await.expect_err("not hex");

    assert!(matches!(err, ClientError::InvalidColor(_)));
    assert_eq!(fake.calls().await.len(), before);
    assert_eq!(controller.snapshot().await.status, err.to_string());
}

#[tokio::test]
async fn failed_channel_write_only_affects_that_channel() {
    // whichever channel write lands first absorbs the failure
    let fake = Arc::new(pattern_fake().failing_call("variable", 1, remote_error("Timed out.")));
    let controller = connected(&fake).await;

    let err = controller
        .set_color("#ff0000")
        .await
        .expect_err("one channel fails");

    assert_eq!(err.to_string(), "Timed out.");
    let session = controller.snapshot().await;
    let failed = [Field::Red, Field::Green, Field::Blue]
        .into_iter()
        .filter(|field| {
            matches!(
                session.slot_status(Slot::Field(*field)),
                SlotStatus::Failed(_)
            )
        })
        .count();
    assert_eq!(failed, 1);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn toggles_send_the_opposite_of_local_state() {
    let fake = Arc::new(pattern_fake());
    let controller = connected(&fake).await;

    assert!(!controller.toggle_power().await.expect("power off"));
    assert_eq!(controller.snapshot().await.status, "Turned off");
    assert!(controller.toggle_power().await.expect("power on"));
    assert_eq!(controller.snapshot().await.status, "Turned on");

    assert!(controller
        .toggle_clock_orientation()
        .await
        .expect("flip clock"));
    assert!(controller.snapshot().await.clock_flipped);

    let calls = fake.calls().await;
    assert!(calls.contains(&Call::invoke("variable", "pwr:0")));
    assert!(calls.contains(&Call::invoke("variable", "pwr:1")));
    assert!(calls.contains(&Call::invoke("variable", "flpclk:1")));
}

#[tokio::test]
async fn operations_require_a_connected_device() {
    let fake = Arc::new(pattern_fake());
    let controller = controller(&fake);
    controller.set_access_token(token()).await;

    let err = controller
        .set_field(Field::Timezone, 2)
        .await
        .expect_err("not connected");

    assert_eq!(err, ClientError::NotConnected);
    assert!(fake.calls().await.is_empty());
}

#[tokio::test]
async fn late_responses_after_disconnect_are_discarded() {
    let fake = Arc::new(pattern_fake().with_delay(Duration::from_millis(30)));
    let controller = controller(&fake);
    controller.set_access_token(token()).await;
    let mut events = controller.subscribe_events();

    let connecting = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.connect(device()).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    controller.disconnect().await;
    let session = connecting.await.expect("join");

    assert!(session.device.is_none());
    assert_eq!(session.brightness, 0);
    assert!(session.patterns.is_empty());
    assert_eq!(session.status, "Disconnected");

    let mut discarded = 0;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StaleResponseDiscarded { device, .. } = event {
            assert_eq!(device, device_id());
            discarded += 1;
        }
    }
    assert!(discarded > 0);
}

#[tokio::test]
async fn refresh_field_reads_a_single_value() {
    let fake = Arc::new(pattern_fake());
    let controller = connected(&fake).await;
    let before = fake.calls().await.len();

    let value = controller
        .refresh_field(Field::NoiseScale)
        .await
        .expect("refresh");

    assert_eq!(value, 30);
    assert_eq!(
        fake.calls().await[before..],
        [Call::invoke("varCursor", "nsc"), Call::read("variable")]
    );
}

#[tokio::test]
async fn set_pattern_selects_the_echoed_entry() {
    let fake = Arc::new(pattern_fake());
    let controller = connected(&fake).await;

    let index = controller
        .set_pattern_by_name("noise")
        .await
        .expect("set pattern");

    assert_eq!(index, 2);
    let session = controller.snapshot().await;
    assert_eq!(
        session.selected_pattern.map(|entry| entry.name),
        Some("Noise".to_string())
    );
    assert_eq!(session.status, "Pattern set");
    assert!(fake
        .calls()
        .await
        .contains(&Call::invoke("patternIndex", "2")));
}

#[tokio::test]
async fn set_pattern_rejects_indices_outside_the_list() {
    let fake = Arc::new(pattern_fake());
    let controller = connected(&fake).await;

    let err = controller.set_pattern(7).await.expect_err("unknown");

    assert_eq!(err, ClientError::UnknownPattern("7".into()));
}

#[tokio::test]
async fn negative_pattern_echo_is_a_rejection() {
    // the list is empty, so the index is not checked locally
    let fake = Arc::new(FakeTransport::new().with_patterns(&[], 0));
    let controller = connected(&fake).await;

    let err = controller.set_pattern(4).await.expect_err("rejected");

    assert_eq!(
        err,
        ClientError::Rejected {
            function: "patternIndex".into(),
            value: -1
        }
    );
    assert!(matches!(
        controller.snapshot().await.slot_status(Slot::ActivePattern),
        SlotStatus::Failed(_)
    ));
}

#[tokio::test]
async fn refresh_patterns_replaces_the_list() {
    let fake = Arc::new(pattern_fake().with_variable("patternCount", json!(2)));
    let controller = connected(&fake).await;
    assert_eq!(controller.snapshot().await.patterns.len(), 2);

    let patterns = controller.refresh_patterns().await.expect("refresh");

    assert_eq!(patterns.len(), 2);
    assert_eq!(controller.snapshot().await.patterns, patterns);
}

#[tokio::test]
async fn discover_devices_prefers_the_last_used_device() {
    let other = DeviceSummary {
        id: DeviceId::new("clock-2"),
        name: None,
        connected: false,
    };
    let fake = Arc::new(FakeTransport::new().with_devices(vec![other.clone(), device()]));
    let controller = controller(&fake);
    controller.set_access_token(token()).await;

    let devices = controller.discover_devices().await.expect("devices");

    assert_eq!(controller.snapshot().await.status, "Loaded devices");
    assert_eq!(choose_device(&devices, Some(&device_id())), Some(&device()));
    assert_eq!(choose_device(&devices, None), Some(&other));
    assert_eq!(
        choose_device(&devices, Some(&DeviceId::new("gone"))),
        Some(&other)
    );
    assert_eq!(choose_device(&[], None), None);
}

#[tokio::test]
async fn discover_devices_without_token_fails_fast() {
    let fake = Arc::new(FakeTransport::new());
    let controller = controller(&fake);

    let err = controller.discover_devices().await.expect_err("no token");

    assert_eq!(err, ClientError::MissingToken);
    assert!(fake.calls().await.is_empty());
}

#[tokio::test]
async fn pattern_progress_stops_once_the_session_moves_on() {
    let fake = Arc::new(pattern_fake().with_delay(Duration::from_millis(20)));
    let controller = controller(&fake);
    controller.set_access_token(token()).await;

    let connecting = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.connect(device()).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    controller.disconnect().await;
    let mut events = controller.subscribe_events();
    connecting.await.expect("join");

    let mut late = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Progress { message, .. } = event {
            late.push(message);
        }
    }
    assert!(late.is_empty(), "{late:?}");
}

#[tokio::test]
async fn pattern_progress_carries_the_connection_generation() {
    let fake = Arc::new(pattern_fake());
    let controller = controller(&fake);
    controller.set_access_token(token()).await;
    let mut events = controller.subscribe_events();

    let session = controller.connect(device()).await;

    let mut progress = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Progress {
            device,
            generation,
            message,
        } = event
        {
            assert_eq!(device, device_id());
            assert_eq!(generation, session.generation);
            progress.push(message);
        }
    }
    assert_eq!(
        progress,
        vec![
            "Loaded pattern count",
            "Loaded pattern name 0",
            "Loaded pattern name 1",
            "Loaded pattern name 2",
        ]
    );
}

#[tokio::test]
async fn attach_then_refresh_reads_only_that_field() {
    let fake = Arc::new(pattern_fake());
    let controller = controller(&fake);
    controller.set_access_token(token()).await;

    controller.attach(device()).await.expect("attach");
    let value = controller
        .refresh_field(Field::Brightness)
        .await
        .expect("refresh");

    assert_eq!(value, 128);
    assert_eq!(fake.calls().await, vec![Call::read("brightness")]);
    let session = controller.snapshot().await;
    assert_eq!(session.brightness, 128);
    assert_eq!(session.status, "Loaded brightness");
    assert!(!session.is_busy());
}

#[tokio::test]
async fn attach_without_token_is_refused() {
    let fake = Arc::new(pattern_fake());
    let controller = controller(&fake);

    let err = controller.attach(device()).await.expect_err("no token");

    assert_eq!(err, ClientError::MissingToken);
    assert!(controller.snapshot().await.device.is_none());
}
