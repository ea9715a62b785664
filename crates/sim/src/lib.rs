// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! whirr-sim: the simulation facade and controller surface.

pub mod controller;
pub mod simulation;

pub use controller::{ControllerContext, ExecutionController};
pub use simulation::Simulation;
