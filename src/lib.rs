#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod cache;
mod core;
pub mod dependency;
mod error;
mod io;
pub mod issue;
#[cfg(feature = "logging")]
mod logging;
pub mod options;
pub mod session;
pub mod task;
pub mod taskmanager;
pub mod transform;
pub mod variant;

pub use crate::core::{Hash32, camel_case, capitalize};
pub use crate::error::*;
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::task::{TaskAction, TaskFactory, TaskGraph, TaskHandle, TaskSpec};
