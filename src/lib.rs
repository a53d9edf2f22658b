pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod preprocessing;
