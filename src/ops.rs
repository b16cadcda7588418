//! The scheduling operators, shared by every reactive shape.

pub mod observe_on;
pub mod subscribe_on;

pub use observe_on::{Cardinality, ObserveOn};
pub use subscribe_on::SubscribeOn;
