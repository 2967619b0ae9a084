//! Chrome DevTools Protocol adapter.
//!
//! Tabs are discovered over HTTP, then each attached tab gets its own WebSocket
//! session driving a [`crate::page::PageContext`].

mod connection;
mod discovery;
mod host;
mod page;

pub use connection::{CdpConnection, CdpEvent};
pub use discovery::{CdpEndpoint, TargetInfo};
pub use host::CdpHost;
pub use page::{CdpPage, CdpRasterizer, BINDING};
