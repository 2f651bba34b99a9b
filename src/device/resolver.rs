// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device resolution.

use crate::device::Device;
use crate::error::{Error, Result};

/// Resolves the physical device to control.
///
/// Called exactly once at startup by the session lifecycle. Implementations
/// may query a cloud inventory; the crate ships [`StaticDeviceResolver`] for
/// configurations that already know the serial number.
#[allow(async_fn_in_trait)]
pub trait DeviceResolver {
    /// Returns the first known device whose model is one of `product_codes`.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` if no device matches.
    async fn lookup_device(&self, product_codes: &[String]) -> Result<Device>;
}

/// A resolver backed by a fixed list of devices.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceResolver {
    devices: Vec<Device>,
}

impl StaticDeviceResolver {
    /// Creates a resolver over the given devices.
    #[must_use]
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    /// Creates a resolver with a single device.
    #[must_use]
    pub fn single(device: Device) -> Self {
        Self::new(vec![device])
    }
}

impl DeviceResolver for StaticDeviceResolver {
    async fn lookup_device(&self, product_codes: &[String]) -> Result<Device> {
        let found = self
            .devices
            .iter()
            .find(|d| product_codes.iter().any(|code| code == d.model()))
            .cloned();

        match found {
            Some(device) => {
                tracing::info!(
                    serial = %device.serial(),
                    model = %device.model(),
                    "Found {} device: {}",
                    device.model(),
                    device.serial()
                );
                Ok(device)
            }
            None => Err(Error::DeviceNotFound {
                product_codes: product_codes.to_vec(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_first_matching_model() {
        let resolver = StaticDeviceResolver::new(vec![
            Device::new("SN0", "A1780"),
            Device::new("SN1", "A1790"),
            Device::new("SN2", "A1790"),
        ]);

        let device = resolver
            .lookup_device(&["A1790".to_string()])
            .await
            .unwrap();
        assert_eq!(device.serial(), "SN1");
    }

    #[tokio::test]
    async fn missing_model_is_device_not_found() {
        let resolver = StaticDeviceResolver::single(Device::new("SN0", "A1780"));

        let err = resolver
            .lookup_device(&["A1790".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound { .. }));
    }
}
