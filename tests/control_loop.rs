// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end control scenarios over the in-memory transport.
//!
//! A scripted responder plays the device: every status request is answered
//! with the next telemetry frame of the script.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use solix_relay::command::{CommandRequest, DeviceCommand};
use solix_relay::config::{BrokerConfig, Config, DeviceSelection};
use solix_relay::controller::{Decision, HysteresisController, LoopExit};
use solix_relay::device::{Device, StaticDeviceResolver};
use solix_relay::protocol::{InboundMessage, MemoryConnector, MemoryTransport, PublishOutcome};
use solix_relay::session::{SessionManager, Stage};
use solix_relay::types::ControlThresholds;
use tokio::sync::watch;

const TOPIC: &str = "dt/anker_power/A1790/SN1/param_info";

fn device() -> Device {
    Device::new("SN1", "A1790")
}

fn frame(soc: i64, switch: i64) -> String {
    format!(r#"{{"main_battery_soc":{soc},"ac_output_power_switch":{switch}}}"#)
}

/// Answers the n-th status request with `script[n]`; `None` stays silent.
fn scripted_device(transport: &MemoryTransport, script: Vec<Option<String>>) {
    let requests = AtomicUsize::new(0);
    transport.set_responder(move |request: &CommandRequest| {
        if request.command() != DeviceCommand::StatusRequest {
            return Vec::new();
        }
        let n = requests.fetch_add(1, Ordering::SeqCst);
        match script.get(n).cloned().flatten() {
            Some(payload) => vec![InboundMessage::new(TOPIC, payload)],
            None => Vec::new(),
        }
    });
}

fn output_commands(transport: &MemoryTransport) -> Vec<DeviceCommand> {
    transport
        .published_commands()
        .into_iter()
        .filter(|c| *c != DeviceCommand::StatusRequest)
        .collect()
}

fn controller(transport: &Arc<MemoryTransport>) -> HysteresisController<MemoryTransport> {
    HysteresisController::new(
        device(),
        Arc::clone(transport),
        ControlThresholds::default(),
    )
}

// ============================================================================
// Cycle-by-cycle scenarios
// ============================================================================

mod cycles {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn enables_once_then_holds_inside_band() {
        let transport = Arc::new(MemoryTransport::new());
        scripted_device(
            &transport,
            vec![None, Some(frame(62, 0)), Some(frame(58, 1))],
        );
        let mut controller = controller(&transport);

        let first = controller.run_cycle().await.unwrap();
        assert_eq!(first.decision, Decision::NoTelemetry);
        assert!(first.command.is_none());
        assert!(output_commands(&transport).is_empty());

        let second = controller.run_cycle().await.unwrap();
        assert_eq!(second.decision.requested_output(), Some(true));
        assert_eq!(second.command, Some(PublishOutcome::Queued));
        assert_eq!(
            output_commands(&transport),
            vec![DeviceCommand::SetAcOutput { enabled: true }]
        );

        let third = controller.run_cycle().await.unwrap();
        assert!(matches!(third.decision, Decision::Hold(_)));
        assert!(third.command.is_none());
        assert_eq!(output_commands(&transport).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disables_when_low_and_on() {
        let transport = Arc::new(MemoryTransport::new());
        scripted_device(&transport, vec![Some(frame(54, 1)), Some(frame(54, 0))]);
        let mut controller = controller(&transport);

        controller.run_cycle().await.unwrap();
        controller.run_cycle().await.unwrap();

        assert_eq!(
            output_commands(&transport),
            vec![DeviceCommand::SetAcOutput { enabled: false }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_command_is_repeated_next_cycle() {
        let transport = Arc::new(MemoryTransport::new());
        // Device keeps reporting the output off
        scripted_device(&transport, vec![Some(frame(65, 0)), Some(frame(65, 0))]);
        let mut controller = controller(&transport);

        controller.run_cycle().await.unwrap();
        controller.run_cycle().await.unwrap();

        assert_eq!(
            output_commands(&transport),
            vec![
                DeviceCommand::SetAcOutput { enabled: true },
                DeviceCommand::SetAcOutput { enabled: true },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_command_anywhere_inside_band() {
        let transport = Arc::new(MemoryTransport::new());
        let script = (56..60)
            .flat_map(|soc| [Some(frame(soc, 0)), Some(frame(soc, 1))])
            .collect::<Vec<_>>();
        let cycles = script.len();
        scripted_device(&transport, script);
        let mut controller = controller(&transport);

        for _ in 0..cycles {
            let report = controller.run_cycle().await.unwrap();
            assert!(matches!(report.decision, Decision::Hold(_)));
        }
        assert!(output_commands(&transport).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_frame_keeps_last_good_values() {
        let transport = Arc::new(MemoryTransport::new());
        scripted_device(
            &transport,
            vec![Some(frame(58, 1)), Some("{not json".to_string())],
        );
        let mut controller = controller(&transport);

        controller.run_cycle().await.unwrap();
        let report = controller.run_cycle().await.unwrap();

        assert!(matches!(report.decision, Decision::Hold(_)));
        let record = controller.cache().get("SN1").unwrap();
        assert_eq!(record.integer("main_battery_soc"), Some(58));
        assert_eq!(record.message_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_frames_merge_into_one_record() {
        let transport = Arc::new(MemoryTransport::new());
        scripted_device(
            &transport,
            vec![
                Some(r#"{"main_battery_soc":70}"#.to_string()),
                Some(r#"{"ac_output_power_switch":0}"#.to_string()),
            ],
        );
        let mut controller = controller(&transport);

        let first = controller.run_cycle().await.unwrap();
        assert!(matches!(first.decision, Decision::Incomplete { .. }));

        let second = controller.run_cycle().await.unwrap();
        assert_eq!(second.decision.requested_output(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn vendor_envelope_is_unwrapped() {
        let transport = Arc::new(MemoryTransport::new());
        let inner = frame(61, 0).replace('"', "\\\"");
        let envelope = format!(r#"{{"head":{{"msg_seq":1}},"payload":"{inner}"}}"#);
        scripted_device(&transport, vec![Some(envelope)]);
        let mut controller = controller(&transport);

        let report = controller.run_cycle().await.unwrap();
        assert_eq!(report.decision.requested_output(), Some(true));
    }
}

// ============================================================================
// Full lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    fn config() -> Config {
        Config::new(BrokerConfig::new("localhost"), DeviceSelection::new("SN1"))
    }

    fn manager(
        transport: &Arc<MemoryTransport>,
    ) -> SessionManager<MemoryConnector, StaticDeviceResolver> {
        SessionManager::new(
            MemoryConnector::new(Arc::clone(transport)),
            StaticDeviceResolver::single(device()),
            config(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn runs_cycles_until_shutdown() {
        let transport = Arc::new(MemoryTransport::new());
        scripted_device(
            &transport,
            vec![None, Some(frame(62, 0)), Some(frame(58, 1))],
        );
        let mut manager = manager(&transport);

        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            // Cycles start at 0s, ~34s and ~68s with the default timing
            tokio::time::sleep(Duration::from_secs(80)).await;
            tx.send(true).unwrap();
        });

        let exit = manager.run(rx).await.unwrap();
        stopper.await.unwrap();

        assert_eq!(exit, LoopExit::Shutdown);
        assert_eq!(
            transport.published_commands(),
            vec![
                DeviceCommand::StatusRequest,
                DeviceCommand::StatusRequest,
                DeviceCommand::SetAcOutput { enabled: true },
                DeviceCommand::StatusRequest,
            ]
        );
        assert_eq!(transport.disconnect_count(), 1);
        assert_eq!(manager.stage(), Stage::Closed);
        assert!(manager.cache().contains("SN1"));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_ends_run_cleanly() {
        let transport = Arc::new(MemoryTransport::new());
        scripted_device(&transport, vec![Some(frame(58, 0))]);
        let mut manager = manager(&transport);

        let dropper = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                transport.drop_connection();
            })
        };

        let (_tx, rx) = watch::channel(false);
        let exit = manager.run(rx).await.unwrap();
        dropper.await.unwrap();

        assert_eq!(exit, LoopExit::Disconnected);
        assert_eq!(transport.disconnect_count(), 1);

        manager.cleanup().await;
        manager.cleanup().await;
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_lost_mid_cycle_is_not_an_error() {
        let transport = Arc::new(MemoryTransport::new());
        transport.inject(TOPIC, frame(62, 0));
        // The device answers the status request by going away, so the
        // enable command that follows finds no connection
        {
            let handle = Arc::downgrade(&transport);
            transport.set_responder(move |_| {
                if let Some(transport) = handle.upgrade() {
                    transport.drop_connection();
                }
                Vec::new()
            });
        }
        let mut manager = manager(&transport);

        let (_tx, rx) = watch::channel(false);
        let exit = manager.run(rx).await.unwrap();

        assert_eq!(exit, LoopExit::Disconnected);
        assert_eq!(transport.disconnect_count(), 1);
        assert!(output_commands(&transport).is_empty());
    }
}
