//! Core domain types shared by the git model and the fleet layer.

pub mod ids;

pub use ids::Sha;
