// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Solix Relay - state-of-charge driven AC output control for battery
//! power stations over MQTT.
//!
//! The crate watches the telemetry a power station publishes and switches
//! its AC output with a two-threshold hysteresis rule: the output is turned
//! on once the battery reaches the high threshold and turned off once it
//! drops to the low threshold. Between the two, nothing is sent.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  inbound queue  ┌───────────────┐  merge   ┌────────────────┐
//! │  Transport   │ ──────────────▶ │ MessagePoller │ ───────▶ │ TelemetryCache │
//! │ (MQTT/memory)│                 └───────────────┘          └────────────────┘
//! └──────────────┘                                                   │ read
//!        ▲            status request / set output   ┌───────────────────────┐
//!        └───────────────────────────────────────── │ HysteresisController  │
//!                                                    └───────────────────────┘
//! ```
//!
//! - [`protocol`]: the [`Transport`](protocol::Transport) seam, with an MQTT
//!   session on `rumqttc` and an in-memory loopback
//! - [`poller`]: background task draining inbound telemetry into the cache
//! - [`telemetry`]: decoding and the shared per-device record cache
//! - [`command`]: status requests and output switching
//! - [`controller`]: the decision rule and the periodic control loop
//! - [`session`]: device resolution, session start and guaranteed cleanup
//!
//! # Quick Start
//!
//! ```no_run
//! use solix_relay::config::Config;
//! use solix_relay::device::StaticDeviceResolver;
//! use solix_relay::protocol::MqttSession;
//! use solix_relay::session::SessionManager;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> solix_relay::Result<()> {
//!     let config = Config::from_env()?;
//!
//!     let connector = MqttSession::builder()
//!         .host(config.broker.host.clone())
//!         .port(config.broker.port)
//!         .connector();
//!     let resolver = StaticDeviceResolver::single(config.device.device());
//!
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     SessionManager::new(connector, resolver, config)
//!         .run(shutdown)
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Testing without a broker
//!
//! ```
//! use std::sync::Arc;
//! use solix_relay::controller::HysteresisController;
//! use solix_relay::device::Device;
//! use solix_relay::protocol::MemoryTransport;
//! use solix_relay::types::ControlThresholds;
//!
//! # async fn example() -> solix_relay::Result<()> {
//! let transport = Arc::new(MemoryTransport::new());
//! transport.inject(
//!     "dt/anker_power/A1790/SN1/param_info",
//!     r#"{"main_battery_soc":62,"ac_output_power_switch":0}"#,
//! );
//!
//! let mut controller = HysteresisController::new(
//!     Device::new("SN1", "A1790"),
//!     Arc::clone(&transport),
//!     ControlThresholds::default(),
//! );
//! let report = controller.run_cycle().await?;
//! assert_eq!(report.decision.requested_output(), Some(true));
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod types;

pub use command::{CommandIssuer, DeviceCommand};
pub use config::Config;
pub use controller::{Decision, HysteresisController, LoopExit};
pub use device::Device;
pub use error::{CommandError, ConfigError, Error, ParseError, ProtocolError, Result, ValueError};
pub use poller::{MessagePoller, PollOutcome};
pub use session::SessionManager;
pub use telemetry::{TelemetryCache, TelemetryRecord};
pub use types::{ControlThresholds, Soc, SwitchState};
