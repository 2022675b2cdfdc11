//! Ember Asset
//!
//! Loading of blueprint units from a world directory:
//! - Unit discovery and id derivation
//! - JSON and script unit parsing
//! - Hot update of a single blueprint

pub mod loader;
pub mod unit;

pub use loader::{LoadReport, Loader, LoaderError, LoaderSettings, RejectedUnit};
pub use unit::UnitFormat;
