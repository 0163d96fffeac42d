//! Handlers 模块

pub mod device_logs;
pub mod devices;
pub mod system;

pub use device_logs::*;
pub use devices::*;
pub use system::*;
