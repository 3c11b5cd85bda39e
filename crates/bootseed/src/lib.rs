pub mod acquire;
pub mod assertion;
pub mod bootloader;
pub mod config;
pub mod error;
pub mod executor;
pub mod image;
pub mod kernel;
pub mod model;
pub mod modules;
pub mod package;
pub mod planner;
pub mod rootfs;
pub mod seed;
pub mod store;

pub use error::{Error, ErrorKind, Result};
