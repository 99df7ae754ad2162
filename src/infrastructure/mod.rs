//! Adapters behind the ports in [`crate::ports`].
pub mod events;
pub mod memory;
pub mod postgres;
