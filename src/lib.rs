// ABOUTME: Library root for stolos - locked, health-verified fleet rollouts.
// ABOUTME: The main binary is in main.rs.

pub mod cloud;
pub mod deploy;
pub mod error;
pub mod machine;
pub mod release;
pub mod types;
