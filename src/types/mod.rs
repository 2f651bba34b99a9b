// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types for the relay controller.
//!
//! Each type ensures values are within their valid ranges at construction
//! time, so the decision rule never has to re-check them.
//!
//! # Types
//!
//! - [`Soc`] - Battery state of charge (0-100%)
//! - [`ControlThresholds`] - The `low < high` hysteresis band
//! - [`SwitchState`] - On/Off state of the AC output relay

mod soc;
mod switch;

pub use soc::{ControlThresholds, Soc};
pub use switch::SwitchState;
