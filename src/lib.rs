pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod handoff;
pub mod sandbox;
pub mod session;

#[cfg(test)]
mod testing;

pub use error::{PlayletError, Result};
pub use session::Playground;
