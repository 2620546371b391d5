pub mod adapters;
pub mod autostart;
pub mod http_transport;
pub mod reconciler;
pub mod registry;
mod sse;
pub mod stdio_transport;
pub mod traits;

pub use registry::AdapterRegistry;
