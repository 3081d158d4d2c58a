pub mod server;

pub mod actions;
pub mod config;
pub mod core;
pub mod error;
pub mod intent;
pub mod session;
pub mod tools;
mod utils;

pub use crate::config::CoreConfig;
pub use crate::core::{Core, CoreResponse, SessionView};
pub use crate::error::{CoreError, CoreResult};
