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

//! HxM Monitor
//!
//! Usage: `hxm-monitor [ADDRESS]`

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hxm_monitor::bluetooth::{channel_sink, input_channel, BluezTransport, SessionDriver};
use hxm_monitor::config::Config;
use hxm_monitor::events::{AppCommand, EventProcessor};

fn init_logging(config: &Config) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = config.log_filter(rust_log.as_deref())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::load()?;
    init_logging(&config)?;

    info!("Starting HxM Monitor v{}...", env!("CARGO_PKG_VERSION"));

    if let Some(address) = std::env::args().nth(1) {
        config.device.address = Some(address);
    }
    let address = config.device.address.clone().ok_or_else(|| {
        anyhow!("no peripheral address: pass one as argument or set device.address in config.toml")
    })?;

    let (input_tx, mut input_rx) = input_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<AppCommand>();

    let transport = BluezTransport::new(input_tx.clone());
    let mut driver = SessionDriver::new(transport, config.driver_config(), input_tx);
    driver.set_sink(channel_sink(event_tx));
    driver.initialize().await?;
    driver.connect(&address)?;

    let mut processor = EventProcessor::new(config, command_tx);

    info!("Ready. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            Some(input) = input_rx.recv() => {
                driver.handle_input(input);
            }
            Some(event) = event_rx.recv() => {
                if let Err(e) = processor.process_event(event, &mut driver) {
                    error!("Error processing driver event: {}", e);
                }
            }
            Some(command) = command_rx.recv() => match command {
                AppCommand::Reconnect => {
                    if let Err(e) = driver.connect(&address) {
                        warn!("Reconnect failed: {}", e);
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    driver.stop_session();
    driver.close();
    driver.transport_mut().wait_closed().await;
    processor.finish()?;

    info!("HxM Monitor stopped");
    Ok(())
}
