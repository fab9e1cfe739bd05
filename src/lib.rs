//! Forum liker library.
//!
//! Logs into a Discourse forum through the training site's SSO, walks a target
//! user's recent posts and likes every one this account has not reacted to yet.

pub mod config;
pub mod constants;
pub mod cookies;
pub mod discovery;
pub mod envelope;
pub mod error;
pub mod liker;
pub mod runner;
pub mod session;
pub mod transport;

pub use error::LikerError;
