//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements           | Connects to                   |
//! |--------------|----------------------|-------------------------------|
//! | `device`     | DevicePort           | Shared state for web handlers |
//! | `device_id`  | n/a                  | eFuse MAC → AP SSID           |
//! | `forward`    | EventSink            | Emoncms HTTP, MQTT            |
//! | `log_sink`   | EventSink            | Serial log output             |
//! | `mdns`       | n/a                  | ESP-IDF mDNS responder        |
//! | `nvs`        | ConfigPort           | NVS / in-memory store         |
//! |              | StoragePort          |                               |
//! | `sd_card`    | SdCard               | FAT volume via VFS            |
//! | `sd_logger`  | EventSink            | CSV datalog on the SD card    |
//! | `time`       | n/a                  | ESP32 system timer + RTC      |
//! | `wifi`       | (drives RadioPort)   | ESP-IDF Wi-Fi STA / soft-AP   |

pub mod device;
pub mod device_id;
pub mod forward;
pub mod log_sink;
pub mod mdns;
pub mod nvs;
pub mod sd_card;
pub mod sd_logger;
pub mod time;
pub mod wifi;
