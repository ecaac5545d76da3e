pub mod audio;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod controller;
pub mod device;
pub mod encode;
pub mod error;
pub mod monitor;
pub mod net;
pub mod presence;
pub mod session;
pub mod telemetry;
