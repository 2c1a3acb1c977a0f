//! Shape profile generation and configuration expansion
//!
//! The shape generator maps a family name and endpoint values to a
//! deterministic per-layer magnitude sequence; the expander applies it
//! twice (layer widths, dropout rates) to turn a compact sampled
//! configuration into a full per-layer one.

pub mod expansion;
pub mod profile;

pub use expansion::expand_shaped_config;
pub use profile::{shaped_magnitudes, ShapeFamily, ShapeSpec};
