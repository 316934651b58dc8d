//! Decoders for sensors attached to a single GPIO line.

pub mod dht11;

pub use dht11::{Dht11, Dht11Reading, Dht11Settings};
