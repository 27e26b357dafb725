pub mod agent;
pub mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evaluation;
pub mod experiment;
pub mod history;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod notes;
pub mod prism;
pub mod rate_limiter;
pub mod signatures;
pub mod store;
pub mod tools;

pub use error::{Error, Result};
