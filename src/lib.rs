pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod maven;
pub mod repo;
pub mod resolve;
pub mod session;
pub mod util;
