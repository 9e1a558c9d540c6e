// src/lib.rs

pub mod cli;
pub mod config;
pub mod credential;
pub mod directory;
pub mod events;
pub mod guard;
pub mod logging;
pub mod media;
pub mod models;
pub mod oauth;
pub mod remote;
pub mod session;
pub mod storage;

pub use session::{Invite, SessionError, SessionManager, SessionState};
