#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Credential and egress selection over a shared, stateful pool.

pub mod selection;
mod selector;

pub use selector::PoolSelector;
