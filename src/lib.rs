pub mod config;
pub mod constants;
pub mod core;
pub mod filter;
pub mod source;
