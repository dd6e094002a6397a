// File: src/services/mod.rs
pub mod control;

pub use control::ControlService;
