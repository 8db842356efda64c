//! Measurement pipeline: calibration, conversion, integration and battery
//! estimation.

pub mod accumulator;
pub mod battery;
pub mod calibration;
pub mod convert;
pub mod meter;

pub use accumulator::{AccumulatorSnapshot, AccumulatorState, Accumulators};
pub use battery::{AlarmMonitor, AlarmState, BatteryModel, BatteryType, RemainingCapacity, TimeToEmpty};
pub use calibration::{CalibrationProfile, CalibrationStore, Channel, Gain};
pub use convert::Reading;
pub use meter::{BatteryEstimate, ChannelReading, Measurement, Meter, RawFrame};
