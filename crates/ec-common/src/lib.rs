#![doc = "Common types shared across the EC actuator workspace."]

pub mod config;
pub mod error;
pub mod limits;
pub mod state;
pub mod units;

pub use config::*;
pub use error::*;
pub use limits::*;
pub use state::*;
