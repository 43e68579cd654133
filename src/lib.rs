pub mod client;
pub mod codec;
pub mod crypto;
pub mod server;
pub mod utils;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
