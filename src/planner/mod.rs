//! Conversion planning

pub mod synthesizer;

pub use synthesizer::{CommandSynthesizer, ConversionPlan};
