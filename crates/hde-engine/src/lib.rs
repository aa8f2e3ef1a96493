//! hde-engine: the real-time worker, parameter exchange, and lifecycle
//! management for the headset DSP engine.

pub mod bridge;
pub mod exchange;
pub mod external;
pub mod lifecycle;
pub mod pipeline;
pub mod thread_priority;

pub use exchange::ParamExchange;
pub use lifecycle::{Engine, HelperFactory};
