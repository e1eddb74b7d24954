// file: src/security/mod.rs
// version: 2.0.0
// guid: p6q7r8s9-t0u1-2345-6789-012345pqrstu

//! Input validation and secret generation

pub mod secrets;
pub mod validation;

pub use validation::ValidationUtils;
