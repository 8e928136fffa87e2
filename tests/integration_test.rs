//! Integration tests for the full acquisition flow against the mock transport.

use std::time::Duration;

use hxm_monitor::bluetooth::mock::{GattCall, MockTransport};
use hxm_monitor::bluetooth::{
    channel_sink, decoder, gatt_uuids, input_channel, AcquisitionState, CustomMeasurement,
    DriverConfig, DriverEvent, DriverInput, HeartRateMeasurement, InputReceiver, InputSender,
    Reading, SensorContact, SessionDriver, SessionPolicy, TransportEvent,
};
use hxm_monitor::DriverError;
use tokio::sync::mpsc;

const ADDRESS: &str = "00:22:D0:12:34:56";

struct Rig {
    driver: SessionDriver<MockTransport>,
    input_tx: InputSender,
    input_rx: InputReceiver,
    events: mpsc::UnboundedReceiver<DriverEvent>,
}

impl Rig {
    async fn new() -> Self {
        let (input_tx, input_rx) = input_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let transport = MockTransport::with_sample_peripheral(input_tx.clone());
        let mut driver = SessionDriver::new(transport, DriverConfig::default(), input_tx.clone());
        driver.set_sink(channel_sink(event_tx));
        driver.initialize().await.unwrap();
        Self {
            driver,
            input_tx,
            input_rx,
            events,
        }
    }

    async fn connected() -> Self {
        let mut rig = Self::new().await;
        rig.driver.connect(ADDRESS).unwrap();
        rig.pump();
        rig.drain_events();
        rig.driver.transport().log().take();
        rig
    }

    fn pump(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            self.driver.handle_input(input);
        }
    }

    fn drain_events(&mut self) -> Vec<DriverEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn notify(&mut self, uuid: uuid::Uuid, reading: &Reading) {
        self.input_tx
            .send(DriverInput::Transport(TransportEvent::CharacteristicChanged {
                uuid,
                value: decoder::encode(reading),
            }))
            .unwrap();
        self.pump();
    }

    fn calls(&self) -> Vec<GattCall> {
        self.driver.transport().log().take()
    }
}

fn heart_rate(bpm: u16) -> Reading {
    Reading::HeartRate(HeartRateMeasurement {
        heart_rate: bpm,
        sensor_contact: SensorContact::Detected,
        energy_expended: None,
        rr_intervals: Some(vec![820, 810]),
    })
}

fn custom() -> Reading {
    Reading::Custom(CustomMeasurement {
        activity: Some(120),
        peak_acceleration: Some(30),
    })
}

#[tokio::test]
async fn test_connect_discovers_services() {
    let mut rig = Rig::new().await;
    rig.driver.connect(ADDRESS).unwrap();
    rig.pump();

    let events = rig.drain_events();
    assert_eq!(
        events[0],
        DriverEvent::Connected {
            address: ADDRESS.to_string()
        }
    );
    match &events[1] {
        DriverEvent::ServicesDiscovered {
            services,
            characteristics,
        } => {
            assert_eq!(services.len(), 3);
            assert!(characteristics.battery.is_some());
            assert!(characteristics.heart_rate.is_some());
            assert!(characteristics.custom.is_some());
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(rig.driver.supported_gatt_services().len(), 3);
}

#[tokio::test]
async fn test_full_cycle() {
    let mut rig = Rig::connected().await;

    let state = rig
        .driver
        .start_discovered_session(SessionPolicy::default())
        .unwrap();
    assert_eq!(state, AcquisitionState::WaitingBattery);

    // The mock answers the battery read with 90 %
    rig.pump();
    assert_eq!(rig.driver.state(), AcquisitionState::WaitingHeartRate);
    assert_eq!(
        rig.calls(),
        vec![
            GattCall::Read(gatt_uuids::BATTERY_LEVEL),
            GattCall::SetNotify(gatt_uuids::HEART_RATE_MEASUREMENT, true),
        ]
    );

    rig.notify(gatt_uuids::HEART_RATE_MEASUREMENT, &heart_rate(72));
    assert_eq!(rig.driver.state(), AcquisitionState::WaitingCustom);
    assert_eq!(
        rig.calls(),
        vec![
            GattCall::SetNotify(gatt_uuids::HEART_RATE_MEASUREMENT, false),
            GattCall::SetNotify(gatt_uuids::CUSTOM_MEASUREMENT, true),
        ]
    );

    rig.notify(gatt_uuids::CUSTOM_MEASUREMENT, &custom());
    assert_eq!(rig.driver.state(), AcquisitionState::WaitingHeartRate);

    let readings: Vec<Reading> = rig
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            DriverEvent::DataAvailable(m) => Some(m.reading),
            _ => None,
        })
        .collect();
    assert_eq!(readings.len(), 3);
    assert!(matches!(readings[0], Reading::Battery(ref b) if b.level == 90));
    assert_eq!(readings[1], heart_rate(72));
    assert_eq!(readings[2], custom());

    let session = rig.driver.session().unwrap();
    assert_eq!(session.received().battery, 1);
    assert_eq!(session.received().heart_rate, 1);
    assert_eq!(session.received().custom, 1);
}

#[tokio::test]
async fn test_heart_rate_only_enters_heart_rate_directly() {
    let mut rig = Rig::connected().await;
    let policy = SessionPolicy {
        battery: false,
        heart_rate: true,
        custom: false,
    };

    let state = rig.driver.start_discovered_session(policy).unwrap();
    assert_eq!(state, AcquisitionState::WaitingHeartRate);
    assert_eq!(
        rig.calls(),
        vec![GattCall::SetNotify(gatt_uuids::HEART_RATE_MEASUREMENT, true)]
    );
    assert!(rig.driver.is_timer_pending());

    rig.notify(gatt_uuids::HEART_RATE_MEASUREMENT, &heart_rate(80));
    assert_eq!(rig.driver.state(), AcquisitionState::WaitingHeartRate);
    assert!(rig.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_forces_next_characteristic() {
    let mut rig = Rig::connected().await;
    let policy = SessionPolicy {
        battery: false,
        heart_rate: true,
        custom: true,
    };
    rig.driver.start_discovered_session(policy).unwrap();
    rig.calls();

    tokio::time::sleep(Duration::from_secs(6)).await;
    rig.pump();

    assert_eq!(rig.driver.state(), AcquisitionState::WaitingCustom);
    assert_eq!(
        rig.calls(),
        vec![
            GattCall::SetNotify(gatt_uuids::HEART_RATE_MEASUREMENT, false),
            GattCall::SetNotify(gatt_uuids::CUSTOM_MEASUREMENT, true),
        ]
    );
    assert_eq!(rig.driver.session().unwrap().forced().heart_rate, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_session_from_every_state_cancels_timer() {
    let cases = [
        (
            SessionPolicy::default(),
            AcquisitionState::WaitingBattery,
            vec![],
        ),
        (
            SessionPolicy {
                battery: false,
                heart_rate: true,
                custom: true,
            },
            AcquisitionState::WaitingHeartRate,
            vec![GattCall::SetNotify(gatt_uuids::HEART_RATE_MEASUREMENT, false)],
        ),
        (
            SessionPolicy {
                battery: false,
                heart_rate: false,
                custom: true,
            },
            AcquisitionState::WaitingCustom,
            vec![GattCall::SetNotify(gatt_uuids::CUSTOM_MEASUREMENT, false)],
        ),
    ];

    for (policy, entry, unsubscribe) in cases {
        let mut rig = Rig::connected().await;
        assert_eq!(rig.driver.start_discovered_session(policy).unwrap(), entry);
        assert!(rig.driver.is_timer_pending());
        rig.calls();

        rig.driver.stop_session();
        assert_eq!(rig.driver.state(), AcquisitionState::Idle);
        assert!(!rig.driver.is_timer_pending());
        assert_eq!(rig.calls(), unsubscribe, "{:?}", entry);

        tokio::time::sleep(Duration::from_secs(30)).await;
        while let Ok(input) = rig.input_rx.try_recv() {
            assert!(
                !matches!(input, DriverInput::Timeout(_)),
                "timer fired after stop in {:?}",
                entry
            );
            rig.driver.handle_input(input);
        }
        assert_eq!(rig.driver.state(), AcquisitionState::Idle);
        assert!(rig.calls().is_empty());
        assert!(!rig
            .drain_events()
            .iter()
            .any(|e| matches!(e, DriverEvent::DataAvailable(_))));
    }
}

#[tokio::test]
async fn test_close_twice_is_harmless() {
    let mut rig = Rig::connected().await;
    rig.driver
        .start_discovered_session(SessionPolicy::default())
        .unwrap();

    rig.driver.close();
    rig.driver.close();
    assert_eq!(
        rig.calls().iter().filter(|c| **c == GattCall::Close).count(),
        1
    );
    assert!(!rig.driver.is_timer_pending());
    assert_eq!(rig.driver.state(), AcquisitionState::Idle);

    // Inputs after close reach no one
    rig.drain_events();
    rig.notify(gatt_uuids::HEART_RATE_MEASUREMENT, &heart_rate(70));
    assert!(rig.drain_events().is_empty());
    assert_eq!(rig.driver.connect(ADDRESS), Err(DriverError::Closed));
}

#[tokio::test]
async fn test_same_address_reuses_link() {
    let mut rig = Rig::connected().await;
    let policy = SessionPolicy {
        battery: false,
        heart_rate: true,
        custom: false,
    };
    rig.driver.start_discovered_session(policy).unwrap();
    rig.calls();

    rig.driver.connect(ADDRESS).unwrap();
    rig.pump();

    // The link is refreshed without a second discovery or a dropped session
    assert_eq!(rig.calls(), vec![GattCall::Connect(ADDRESS.to_string())]);
    assert!(rig.drain_events().is_empty());
    assert_eq!(rig.driver.state(), AcquisitionState::WaitingHeartRate);
}

#[tokio::test]
async fn test_different_address_tears_down_old_link() {
    let mut rig = Rig::connected().await;
    rig.driver
        .start_discovered_session(SessionPolicy::default())
        .unwrap();
    rig.pump();
    rig.calls();
    rig.drain_events();

    let other = "00:22:D0:AB:CD:EF";
    rig.driver.connect(other).unwrap();
    rig.pump();

    let calls = rig.calls();
    let disconnect = calls
        .iter()
        .position(|c| *c == GattCall::Disconnect)
        .unwrap();
    let connect = calls
        .iter()
        .position(|c| *c == GattCall::Connect(other.to_string()))
        .unwrap();
    assert!(disconnect < connect);

    let events = rig.drain_events();
    assert_eq!(events[0], DriverEvent::Disconnected);
    assert_eq!(
        events[1],
        DriverEvent::Connected {
            address: other.to_string()
        }
    );
}

#[tokio::test]
async fn test_transport_unavailable() {
    let (input_tx, _input_rx) = input_channel();
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let transport = MockTransport::new(input_tx.clone()).unavailable();
    let mut driver = SessionDriver::new(transport, DriverConfig::default(), input_tx);
    driver.set_sink(channel_sink(event_tx));

    let result = driver.initialize().await;
    assert!(matches!(result, Err(DriverError::TransportUnavailable(_))));
    assert!(matches!(events.try_recv(), Ok(DriverEvent::Error(_))));
    assert_eq!(driver.connect(ADDRESS), Err(DriverError::NotInitialized));
}

#[tokio::test]
async fn test_invalid_address_rejected() {
    let mut rig = Rig::new().await;
    assert!(matches!(
        rig.driver.connect("not-an-address"),
        Err(DriverError::InvalidAddress(_))
    ));
    assert!(rig.calls().iter().all(|c| *c == GattCall::Initialize));
}
