//! Domain models for the pharmacy desk.

mod conversation;
mod patient;
mod prescription;

pub use conversation::*;
pub use patient::*;
pub use prescription::*;
