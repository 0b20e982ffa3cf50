//! Built-in function tools and tools-configuration assembly for chatloop.
//!
//! The function tools proxy to the functions API over HTTP; the
//! configuration builder turns a [`ToolsState`] into the opaque
//! `toolsConfiguration` array forwarded upstream with every turn.

pub mod tools;
pub mod tools_config;

pub use tools::*;
pub use tools_config::*;
