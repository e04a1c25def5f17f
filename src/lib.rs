// C ABI 导出面和这些 clippy 规则冲突
#![allow(
    clippy::missing_safety_doc,
    clippy::new_without_default,
    clippy::len_without_is_empty,
    clippy::type_complexity
)]

pub mod bridge;
pub mod config;
pub mod demo;
pub mod error;
pub mod facade;
pub mod handle;
pub mod host;
pub mod logging;
pub mod ownership;
pub mod plugin;
pub mod registry;

pub use bridge::{Bridge, BridgeStats};
pub use error::{BridgeError, Result};
pub use handle::Handle;
pub use registry::Ref;
