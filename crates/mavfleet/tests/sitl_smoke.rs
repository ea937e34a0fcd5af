use mavfleet::{CommandKind, Registry, SessionConfig, VehicleFamily};
use std::time::Duration;

const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(30);

fn sitl_url() -> String {
    std::env::var("MAVFLEET_SITL_URL").unwrap_or_else(|_| String::from("udp://:14550"))
}

async fn setup_sitl_registry() -> Registry {
    let registry = Registry::new(SessionConfig {
        discovery_timeout_ms: TELEMETRY_TIMEOUT.as_millis() as u64,
        ..SessionConfig::default()
    });
    registry
        .add_vehicle("sitl", &sitl_url())
        .await
        .expect("SITL should send a heartbeat");

    tokio::time::timeout(TELEMETRY_TIMEOUT, async {
        loop {
            let snapshot = registry.get_telemetry_snapshot("sitl").unwrap();
            if snapshot.position.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    })
    .await
    .expect("should receive position from SITL");
    registry
}

async fn wait_for_mode(registry: &Registry, name: &str, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = registry.get_telemetry_snapshot("sitl").unwrap();
        if snapshot.mode_name == name {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("expected mode {name}, vehicle reports {}", snapshot.mode_name);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[tokio::test]
#[ignore = "requires ArduPilot SITL endpoint"]
async fn sitl_set_flight_mode_by_name() {
    let registry = setup_sitl_registry().await;
    let identity = registry.identity("sitl").unwrap();
    assert_eq!(identity.family(), VehicleFamily::Multirotor);

    registry.send_set_mode("sitl", "GUIDED").await.unwrap();
    wait_for_mode(&registry, "GUIDED", Duration::from_secs(10)).await;

    registry.send_set_mode("sitl", "LOITER").await.unwrap();
    wait_for_mode(&registry, "LOITER", Duration::from_secs(10)).await;

    registry.shutdown();
}

#[tokio::test]
#[ignore = "requires ArduPilot SITL endpoint"]
async fn sitl_streaming_buffers_live_traffic() {
    let registry = setup_sitl_registry().await;
    registry.start_streaming("sitl").unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let messages = registry.drain_buffered_messages("sitl");
    assert!(!messages.is_empty());
    assert!(messages.len() <= 100);
    assert!(messages.iter().any(|m| m.name == "HEARTBEAT"));

    // Disarmed on the ground, so this is harmless.
    registry.send_command("sitl", CommandKind::Disarm).await.unwrap();
    registry.shutdown();
}
