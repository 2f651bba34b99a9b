// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `solix-relay` - switches a power station's AC output from its battery
//! state of charge.
//!
//! Configuration comes from `SOLIX_*` environment variables (see
//! [`solix_relay::config`]); log verbosity from `RUST_LOG`.

use std::process::ExitCode;

use solix_relay::config::Config;
use solix_relay::device::StaticDeviceResolver;
use solix_relay::protocol::MqttSession;
use solix_relay::session::SessionManager;
use tokio::sync::watch;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        host = %config.broker.host,
        port = config.broker.port,
        country = %config.broker.country,
        device = %config.device.serial,
        thresholds = %config.thresholds,
        "Starting solix-relay"
    );

    let mut connector = MqttSession::builder()
        .host(config.broker.host.clone())
        .port(config.broker.port);
    if let Some((user, password)) = &config.broker.credentials {
        connector = connector.credentials(user.clone(), password.clone());
    }
    let resolver = StaticDeviceResolver::single(config.device.device());

    let (stop_tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let mut manager = SessionManager::new(connector.connector(), resolver, config);
    match manager.run(shutdown).await {
        Ok(exit) => {
            tracing::info!(?exit, "solix-relay stopped");
            ExitCode::SUCCESS
        }
        // Already logged by the session manager
        Err(_) => ExitCode::FAILURE,
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Interrupted, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
