pub mod config;
pub mod discover;
pub mod error;
pub mod geo;
pub mod mapping;
pub mod parse;
pub mod run;
pub mod session;
pub mod store;
pub mod transform;
