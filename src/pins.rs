//! GPIO / peripheral pin assignments for the emonDC gateway board.
//!
//! Single source of truth; `main` builds every driver from these numbers.

// ---------------------------------------------------------------------------
// Sensor-board link (UART2)
// ---------------------------------------------------------------------------

/// ESP32 TX → sensor board RX.
pub const SENSOR_UART_TX_GPIO: i32 = 17;
/// Sensor board TX → ESP32 RX.
pub const SENSOR_UART_RX_GPIO: i32 = 16;
pub const SENSOR_UART_BAUD: u32 = 115_200;

// ---------------------------------------------------------------------------
// SD card (VSPI)
// ---------------------------------------------------------------------------

pub const SD_SCK_GPIO: i32 = 18;
pub const SD_MOSI_GPIO: i32 = 23;
pub const SD_MISO_GPIO: i32 = 19;
pub const SD_CS_GPIO: i32 = 5;

// ---------------------------------------------------------------------------
// User input
// ---------------------------------------------------------------------------

/// BOOT button, active LOW.  Held during a Wi-Fi join it cancels to AP mode.
pub const BUTTON_GPIO: i32 = 0;
