//! Output artifact verification

pub mod verifier;

pub use verifier::{ArtifactFacts, ArtifactVerifier};
