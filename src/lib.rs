pub mod adb;
pub mod args;
pub mod config;
pub mod dispatcher;
pub mod manager;
pub mod registry;
pub mod wol;

pub use dispatcher::RemoteControl;
pub use manager::ConnectionManager;
pub use registry::DeviceRegistry;
