//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements          | Connects to                 |
//! |-------------|---------------------|-----------------------------|
//! | `hardware`  | SensorPort          | ADC, level/flow GPIO        |
//! |             | ActuatorPort        | SSR GPIO, pump LEDC, valve  |
//! | `log_sink`  | EventSink           | Serial log output           |
//! | `nvs`       | ConfigPort          | NVS / in-memory store       |
//! |             | StoragePort         |                             |
//! | `firmware`  | FirmwarePort        | esp-ota partition / `Vec`   |
//! | `uart`      | Transport           | Hub UART1, meter UART2      |
//! | `power_meter` | PowerMeterPort    | PZEM meter (Modbus RTU)     |
//! | `time`      | (clock)             | esp_timer, gettimeofday     |

pub mod firmware;
pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod power_meter;
pub mod time;
pub mod uart;
