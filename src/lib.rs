pub mod app;
pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod http;
pub mod imap;
pub mod mime;
pub mod session;
pub mod types;
