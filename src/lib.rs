//! grimoire: a small book catalog backend.
//!
//! Users sign up and log in with an email and password, then publish books
//! with a cover image and rate each other's books on a 1 to 5 scale.
//!
//! # Features
//!
//! - Argon2 password hashing and HS256 bearer tokens
//! - Book CRUD restricted to the owner
//! - Cover uploads resized to a fixed thumbnail box
//! - One rating per user per book, with a rounded average
//! - Per-IP rate limiting and permissive CORS
//! - SQLite storage

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Password hashing, tokens and accounts.
pub mod auth;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Cover image processing and storage.
pub mod images;
/// Book model and rating rules.
pub mod library;
/// HTTP server.
pub mod server;


pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
