//! oidc-device-login library
//!
//! Configuration resolution and terminal presentation for the login binary.

pub mod config;
pub mod ui;
