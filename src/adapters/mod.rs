//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements   | Connects to            |
//! |----------------|--------------|------------------------|
//! | `log_sink`     | EventSink    | `log` facade           |
//! | `memory_store` | StoragePort  | in-process `HashMap`   |
//! | `time`         | ClockPort    | `Instant` / manual     |

pub mod log_sink;
pub mod memory_store;
pub mod time;
