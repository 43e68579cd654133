pub mod client;
pub mod config;
pub mod engine;

pub use client::Client;
pub use config::ClientConfig;
pub use engine::Engine;
