// File: afkbot-core/src/lib.rs

pub mod detector;
pub mod eventbus;
pub mod platforms;
pub mod reconnect;
pub mod repositories;
pub mod services;
pub mod supervisor;
pub mod test_utils;

pub use afkbot_common::Error;
pub use eventbus::LogBus;
pub use supervisor::Supervisor;
