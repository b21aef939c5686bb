// intellid - Intelligence definition serving pipeline
// Library exports

pub mod breaker;
pub mod cache;
pub mod call_log;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod monitoring;
pub mod pipeline;
pub mod prompt;
pub mod providers;
pub mod schema;
pub mod server;
pub mod versions;
