//! Checkout domain: value objects, aggregates and the events they produce.
pub mod aggregates;
pub mod events;
pub mod value_objects;
