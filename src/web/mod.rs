//! Web API: request model, routing, SD transfer sessions and JSON views.
//!
//! Everything here is transport-agnostic.  The binary adapts the ESP-IDF
//! HTTP server onto [`Request`] / [`Reply`]; tests drive the [`Router`]
//! directly.

pub mod request;
pub mod response;
pub mod router;
pub mod sd;
pub mod views;

pub use request::{Method, Request};
pub use response::{Reply, Response};
pub use router::{DevicePort, Router};
pub use sd::{DownloadSession, SdGate, SdLease, UploadSession};
pub use views::StatusSnapshot;
