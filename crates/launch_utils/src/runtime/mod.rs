//! Runtime components: the launch service and process management

pub mod process;
pub mod service;

pub use process::*;
pub use service::*;
