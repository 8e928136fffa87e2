// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Event processing for the monitor application.
//!
//! Consumes [`DriverEvent`]s: starts sessions once services are known,
//! prints and records measurements, and schedules reconnects.

use anyhow::Result;
use std::io::Write;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bluetooth::{DriverEvent, GattTransport, Measurement, SessionDriver};
use crate::config::Config;
use crate::error::DriverError;
use crate::storage::SessionRecorder;

/// Requests from the processor back to the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    /// Connect again to the configured peripheral.
    Reconnect,
}

/// Process events from the session driver.
pub struct EventProcessor {
    config: Config,
    commands: mpsc::UnboundedSender<AppCommand>,
    output: Box<dyn Write + Send>,
    recorder: Option<SessionRecorder>,
    connected: bool,
    connect_failures: u32,
    reconnect_enabled: bool,
}

impl EventProcessor {
    /// Create a processor printing measurements to stdout.
    pub fn new(config: Config, commands: mpsc::UnboundedSender<AppCommand>) -> Self {
        Self::with_output(config, commands, Box::new(std::io::stdout()))
    }

    pub fn with_output(
        config: Config,
        commands: mpsc::UnboundedSender<AppCommand>,
        output: Box<dyn Write + Send>,
    ) -> Self {
        let reconnect_enabled = config.connection.auto_reconnect;
        Self {
            config,
            commands,
            output,
            recorder: None,
            connected: false,
            connect_failures: 0,
            reconnect_enabled,
        }
    }

    /// Whether a reconnect will still be scheduled after a disconnect.
    pub fn reconnect_enabled(&self) -> bool {
        self.reconnect_enabled
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// Process a single event.
    pub fn process_event<T: GattTransport>(
        &mut self,
        event: DriverEvent,
        driver: &mut SessionDriver<T>,
    ) -> Result<()> {
        match event {
            DriverEvent::Connected { address } => {
                info!("Device connected: {}", address);
                self.connected = true;
                self.connect_failures = 0;
            }
            DriverEvent::Disconnected => {
                self.handle_disconnected()?;
            }
            DriverEvent::ServicesDiscovered {
                services,
                characteristics,
            } => {
                info!(
                    "Discovered {} services (battery={} heart_rate={} custom={})",
                    services.len(),
                    characteristics.battery.is_some(),
                    characteristics.heart_rate.is_some(),
                    characteristics.custom.is_some()
                );
                if self.config.session.auto_start {
                    self.start_session(driver)?;
                }
            }
            DriverEvent::DataAvailable(measurement) => {
                self.handle_measurement(&measurement)?;
            }
            DriverEvent::Error(e) => {
                error!("Driver error: {}", e);
                if self.reconnect_enabled {
                    warn!("Automatic reconnect disabled");
                }
                self.reconnect_enabled = false;
            }
        }
        Ok(())
    }

    /// Close the open recording, if any.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(recorder) = self.recorder.take() {
            recorder.finish()?;
        }
        Ok(())
    }

    fn start_session<T: GattTransport>(&mut self, driver: &mut SessionDriver<T>) -> Result<()> {
        self.finish()?;

        match driver.start_discovered_session(self.config.session_policy()) {
            Ok(state) => {
                info!("Acquisition started in {:?}", state);
            }
            Err(DriverError::NoEligibleCharacteristic) => {
                warn!("Peripheral offers none of the enabled characteristics");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if self.config.output.record_sessions {
            if let Some(session) = driver.session() {
                self.recorder = Some(SessionRecorder::create(
                    &self.config.data_dir,
                    session.started_at(),
                )?);
            }
        }
        Ok(())
    }

    fn handle_measurement(&mut self, measurement: &Measurement) -> Result<()> {
        debug!("Measurement: {:?}", measurement.reading);

        if self.config.output.json_lines {
            let line = serde_json::to_string(measurement)?;
            writeln!(self.output, "{}", line)?;
            self.output.flush()?;
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(measurement)?;
        }
        Ok(())
    }

    fn handle_disconnected(&mut self) -> Result<()> {
        info!("Device disconnected");
        self.finish()?;

        if !self.connected {
            self.connect_failures += 1;
        }
        self.connected = false;

        if !self.reconnect_enabled {
            return Ok(());
        }

        let max = self.config.connection.max_connect_failures;
        if max > 0 && self.connect_failures >= max {
            error!("Giving up after {} failed connection attempts", self.connect_failures);
            self.reconnect_enabled = false;
            return Ok(());
        }

        let delay = self.config.reconnect_delay();
        info!("Reconnecting in {:?}", delay);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(AppCommand::Reconnect);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::mock::MockTransport;
    use crate::bluetooth::{channel_sink, input_channel, AcquisitionState, InputReceiver};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        dir: TempDir,
        driver: SessionDriver<MockTransport>,
        inputs: InputReceiver,
        events: mpsc::UnboundedReceiver<DriverEvent>,
        processor: EventProcessor,
        commands: mpsc::UnboundedReceiver<AppCommand>,
        output: SharedBuffer,
    }

    impl Fixture {
        async fn new(configure: impl FnOnce(&mut Config)) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = Config {
                data_dir: dir.path().to_path_buf(),
                ..Config::default()
            };
            configure(&mut config);

            let (input_tx, inputs) = input_channel();
            let (event_tx, events) = mpsc::unbounded_channel();
            let transport = MockTransport::with_sample_peripheral(input_tx.clone());
            let mut driver = SessionDriver::new(transport, config.driver_config(), input_tx);
            driver.set_sink(channel_sink(event_tx));
            driver.initialize().await.unwrap();

            let (command_tx, commands) = mpsc::unbounded_channel();
            let output = SharedBuffer::default();
            let processor =
                EventProcessor::with_output(config, command_tx, Box::new(output.clone()));

            Self {
                dir,
                driver,
                inputs,
                events,
                processor,
                commands,
                output,
            }
        }

        /// Feed queued inputs to the driver and driver events to the
        /// processor until both queues are empty.
        fn pump(&mut self) {
            loop {
                let mut progressed = false;
                while let Ok(input) = self.inputs.try_recv() {
                    self.driver.handle_input(input);
                    progressed = true;
                }
                while let Ok(event) = self.events.try_recv() {
                    self.processor
                        .process_event(event, &mut self.driver)
                        .unwrap();
                    progressed = true;
                }
                if !progressed {
                    break;
                }
            }
        }

        fn output_lines(&self) -> Vec<serde_json::Value> {
            let bytes = self.output.0.lock().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_auto_start_prints_and_records() {
        let mut f = Fixture::new(|_| {}).await;
        f.driver.connect("00:22:D0:12:34:56").unwrap();
        f.pump();

        assert!(f.processor.is_recording());
        assert_eq!(f.driver.state(), AcquisitionState::WaitingHeartRate);

        let lines = f.output_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["kind"], "battery");
        assert_eq!(lines[0]["level"], 90);

        f.processor.finish().unwrap();
        let sessions: Vec<_> = std::fs::read_dir(f.dir.path().join("sessions"))
            .unwrap()
            .collect();
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_no_auto_start_leaves_driver_idle() {
        let mut f = Fixture::new(|c| c.session.auto_start = false).await;
        f.driver.connect("00:22:D0:12:34:56").unwrap();
        f.pump();

        assert_eq!(f.driver.state(), AcquisitionState::Idle);
        assert!(!f.processor.is_recording());
        assert!(f.output_lines().is_empty());
    }

    #[tokio::test]
    async fn test_no_eligible_characteristic_is_not_an_error() {
        let mut f = Fixture::new(|c| {
            c.session.battery = false;
            c.session.heart_rate = false;
            c.session.custom = false;
        })
        .await;
        f.driver.connect("00:22:D0:12:34:56").unwrap();
        f.pump();

        assert_eq!(f.driver.state(), AcquisitionState::Idle);
        assert!(!f.processor.is_recording());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_schedules_reconnect() {
        let mut f = Fixture::new(|c| c.connection.reconnect_delay_ms = 500).await;
        f.driver.connect("00:22:D0:12:34:56").unwrap();
        f.pump();

        f.processor
            .process_event(DriverEvent::Disconnected, &mut f.driver)
            .unwrap();
        assert!(!f.processor.is_recording());
        assert!(f.commands.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(f.commands.recv().await, Some(AppCommand::Reconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_connect_failures_stop_reconnecting() {
        let mut f = Fixture::new(|c| c.connection.max_connect_failures = 2).await;

        f.processor
            .process_event(DriverEvent::Disconnected, &mut f.driver)
            .unwrap();
        assert!(f.processor.reconnect_enabled());

        f.processor
            .process_event(DriverEvent::Disconnected, &mut f.driver)
            .unwrap();
        assert!(!f.processor.reconnect_enabled());
    }

    #[tokio::test]
    async fn test_error_event_disables_reconnect() {
        let mut f = Fixture::new(|_| {}).await;
        f.processor
            .process_event(DriverEvent::Error("adapter lost".to_string()), &mut f.driver)
            .unwrap();
        assert!(!f.processor.reconnect_enabled());

        f.processor
            .process_event(DriverEvent::Disconnected, &mut f.driver)
            .unwrap();
        assert!(f.commands.try_recv().is_err());
    }
}
