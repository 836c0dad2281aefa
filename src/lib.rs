//! keypin: pins browser tabs to keyboard keys across numbered layers and
//! drives them with short typed chords.

pub mod combo;
pub mod commands;
pub mod config;
pub mod error;
pub mod host;
pub mod keys;
pub mod logging;
pub mod pins;
pub mod store;

pub use commands::{Command, Dispatcher, Response};
pub use error::{KeypinError, Result};
