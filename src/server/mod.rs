pub mod config;
pub mod engine;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use engine::Engine;
pub use server::Server;
pub use session::{IDLE_TTL, REAPER_INTERVAL, SessionTable};
