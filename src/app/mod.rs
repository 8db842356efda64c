//! Application core: pure domain logic, zero I/O.
//!
//! This module contains the sampling-loop rules for the emonDC gateway:
//! FSM orchestration, report generation and accumulator persistence.
//! All interaction with hardware happens through **port traits** defined
//! in [`ports`], keeping this layer fully testable without real peripherals.

pub mod channels;
pub mod commands;
pub mod events;
pub mod ports;
pub mod report;
pub mod service;
