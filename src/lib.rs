pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod provider;
pub mod router;
pub mod sink;
