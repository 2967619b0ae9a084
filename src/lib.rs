//! nodeshot - capture a single page element as an image.
//!
//! A trigger controller validates the active tab, instruments its page context
//! and starts a selection session. The page context resolves a target element,
//! rasterizes it and hands the encoded image to a persistence relay, which is
//! the only context allowed to write files.

pub mod capture;
pub mod cdp;
pub mod cli;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod injector;
pub mod page;
pub mod protocol;
pub mod relay;
pub mod selection;
pub mod status;

#[cfg(test)]
mod testing;

pub use error::{NodeshotError, Result};
