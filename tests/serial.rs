use std::time::Duration;

use chrono::{DateTime, Utc};
use forno::{
    config::{DeviceConfig, SerialConfig},
    error::DeviceError,
    events::{Event, Subscription, TransitionKind},
    hardware::{
        Device, SerialDevice,
        serial::memory::{MemoryPeer, MemoryTransport},
    },
    protocol::TelemetryDecoder,
    telemetry::{FurnaceState, Telemetry},
};
use proptest::prelude::*;
use tokio::time::timeout;

const RECORD: &[u8] = b"T=900;SP=1000;MODE=AUTO;STATE=HEATING;HEATER=200;FAN=0;ALARM=NONE;ESTOP=0\n";
const PATIENCE: Duration = Duration::from_secs(2);

fn serial_device() -> (SerialDevice<MemoryTransport>, MemoryPeer) {
    let config = DeviceConfig {
        simulator: false,
        serial: SerialConfig {
            write_timeout_ms: 50,
            ..Default::default()
        },
        ..Default::default()
    };

    let (transport, peer) = MemoryTransport::pair();
    (SerialDevice::new(&config, transport), peer)
}

async fn next_telemetry(events: &mut Subscription) -> Telemetry {
    timeout(PATIENCE, events.next_telemetry())
        .await
        .expect("no telemetry in time")
        .expect("publisher closed")
}

#[tokio::test]
async fn test_setpoint_round_trip() {
    let (device, peer) = serial_device();
    let mut events = device.subscribe();

    device.start().await.unwrap();

    assert_eq!(device.send("SET_SP=1500").await.unwrap(), "OK");
    assert_eq!(peer.written(), b"SET_SP=1500\n");

    // The controller applies the setpoint and reports it in its next record
    peer.feed("T=1400;SP=1500;MODE=AUTO;STATE=HEAT;HEATER=120;FAN=0;ALARM=NONE;ESTOP=0\n");

    let telemetry = next_telemetry(&mut events).await;
    assert_eq!(telemetry.setpoint, 1500.);
    assert_eq!(telemetry.state_label, FurnaceState::Heating);
    assert_eq!(device.last_telemetry(), Some(telemetry));

    device.stop().await.unwrap();
}

#[tokio::test]
async fn test_fragmented_reads() {
    let (device, peer) = serial_device();
    let mut events = device.subscribe();

    device.start().await.unwrap();

    peer.feed("T=9");
    peer.feed("00;SP=10");
    peer.feed("00\nT=901;SP=1000\nT=9");

    assert_eq!(next_telemetry(&mut events).await.current_temperature, 900.);
    assert_eq!(next_telemetry(&mut events).await.current_temperature, 901.);

    peer.feed("02\n");
    assert_eq!(next_telemetry(&mut events).await.current_temperature, 902.);

    device.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let (device, peer) = serial_device();
    let mut events = device.subscribe();

    device.start().await.unwrap();

    peer.feed(&b"Sistema iniciado!\n\xff\xfe\x00\nACK\nERR=CMD\n{\"t\":\n"[..]);
    peer.feed("TEMP: 1450.0C | SP: 1500C | AQUECENDO (+5C) | M:ON V:OFF A:OFF\n");

    let telemetry = next_telemetry(&mut events).await;
    assert_eq!(telemetry.current_temperature, 1450.);
    assert!(telemetry.heater_active);
    assert!(device.is_running());

    device.stop().await.unwrap();
}

#[tokio::test]
async fn test_alarm_transitions() {
    let (device, peer) = serial_device();
    let mut events = device.subscribe();

    device.start().await.unwrap();

    peer.feed("T=1590;SP=1500;HEATER=200;ALARM=NONE\nT=1605;ALARM=HIGH\nT=1760;ALARM=CRIT;HEATER=0;FAN=255\n");

    let mut kinds = Vec::new();
    let mut snapshots = 0;

    while snapshots < 3 {
        match timeout(PATIENCE, events.recv()).await.unwrap().unwrap() {
            Event::Telemetry(_) => snapshots += 1,
            Event::Transition(transition) => kinds.push(transition.kind),
        }
    }

    // The last transition may trail the last snapshot
    if let Ok(Some(Event::Transition(transition))) =
        timeout(Duration::from_millis(200), events.recv()).await
    {
        kinds.push(transition.kind);
    }

    assert_eq!(
        kinds,
        [TransitionKind::AlarmRaised, TransitionKind::InterlockEngaged]
    );

    let last = device.last_telemetry().unwrap();
    assert!(last.critical_interlock_active);
    assert!(!last.system_active);
    assert_eq!(last.state_label, FurnaceState::CriticalInterlock);

    device.stop().await.unwrap();
}

#[tokio::test]
async fn test_not_running() {
    let (device, peer) = serial_device();

    assert!(matches!(
        device.send("GET").await,
        Err(DeviceError::NotRunning)
    ));
    assert!(device.last_telemetry().is_none());
    assert!(peer.written().is_empty());
}

#[tokio::test]
async fn test_connection_failed() {
    let (device, peer) = serial_device();
    peer.fail_open(true);

    let error = device.start().await.unwrap_err();

    assert!(matches!(error, DeviceError::ConnectionFailed { ref transport, .. } if transport == "memory"));
    assert!(!device.is_running());

    peer.fail_open(false);
    device.start().await.unwrap();
    assert!(device.is_running());

    device.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let (device, peer) = serial_device();

    device.stop().await.unwrap();

    device.start().await.unwrap();
    device.start().await.unwrap();
    assert_eq!(peer.opened(), 1);

    device.stop().await.unwrap();
    device.stop().await.unwrap();
    assert!(!device.is_running());
    assert!(matches!(
        device.send("GET").await,
        Err(DeviceError::NotRunning)
    ));

    device.start().await.unwrap();
    assert_eq!(peer.opened(), 2);

    device.stop().await.unwrap();
}

#[tokio::test]
async fn test_write_timeout() {
    let (device, peer) = serial_device();
    device.start().await.unwrap();

    peer.stall_writes(Duration::from_millis(300));

    assert!(matches!(
        device.send("MODE=AUTO").await,
        Err(DeviceError::WriteTimeout(_))
    ));

    // Stop waits for the stalled write instead of abandoning it
    device.stop().await.unwrap();
    assert_eq!(peer.written(), b"MODE=AUTO\n");
}

#[tokio::test]
async fn test_invalid_command() {
    let (device, peer) = serial_device();
    device.start().await.unwrap();

    assert!(matches!(
        device.send("START\nSTOP").await,
        Err(DeviceError::InvalidCommand(_))
    ));
    assert!(matches!(
        device.send("  ").await,
        Err(DeviceError::InvalidCommand(_))
    ));
    assert!(peer.written().is_empty());

    device.stop().await.unwrap();
}

#[tokio::test]
async fn test_peer_disconnect() {
    let (device, peer) = serial_device();
    device.start().await.unwrap();

    peer.disconnect();

    timeout(PATIENCE, async {
        while device.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("device still running after the link closed");

    assert!(matches!(
        device.send("GET").await,
        Err(DeviceError::NotRunning)
    ));

    // A dead link is reopened by the next start
    let mut events = device.subscribe();
    device.start().await.unwrap();
    assert!(device.is_running());
    assert_eq!(peer.opened(), 2);

    peer.feed("T=900;SP=1000\n");
    assert_eq!(next_telemetry(&mut events).await.current_temperature, 900.);
    assert_eq!(device.send("GET").await.unwrap(), "OK");

    device.stop().await.unwrap();
    assert!(!device.is_running());
}

/* == Decoder properties == */

fn decode(chunks: &[&[u8]]) -> Vec<Telemetry> {
    let mut decoder = TelemetryDecoder::default();

    chunks
        .iter()
        .flat_map(|chunk| decoder.feed(chunk))
        .map(|telemetry| telemetry.with_captured_at(DateTime::<Utc>::UNIX_EPOCH))
        .collect()
}

proptest! {
    #[test]
    fn split_record_decodes_like_whole(a in 0..=RECORD.len(), b in 0..=RECORD.len()) {
        let (a, b) = (a.min(b), a.max(b));

        let whole = decode(&[RECORD]);
        let split = decode(&[&RECORD[..a], &RECORD[a..b], &RECORD[b..]]);

        prop_assert_eq!(whole.len(), 1);
        prop_assert_eq!(split, whole);
    }

    #[test]
    fn garbage_never_desynchronises(garbage in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let decoded = decode(&[garbage.as_slice(), b"\n".as_slice(), RECORD]);

        let last = decoded.last().unwrap();
        prop_assert_eq!(last.current_temperature, 900.);
        prop_assert_eq!(last.setpoint, 1000.);
    }
}
