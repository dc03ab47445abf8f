//! fizhub: coordinates NFC reader devices into three-party bonds.

pub mod config;
pub mod hub;
pub mod indicator;
pub mod power;
pub mod recorder;
pub mod registry;
pub mod session;
pub mod tasks;
pub mod transport;
pub mod validation;
