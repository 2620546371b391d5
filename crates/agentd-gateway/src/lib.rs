pub mod service;
pub mod stores;
pub mod wiring;

pub use service::{SendOptions, SessionService};
