//! Sensor-board serial link: line codec and non-blocking UART reader.

pub mod codec;
pub mod link;

pub use codec::{LineDecoder, MAX_LINE, parse_frame};
pub use link::SerialLink;
