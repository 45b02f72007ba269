/// Defines the server config.
pub mod config;
/// Main server module.
pub mod server;

pub use config::Config;
pub use server::{ClientId, ClientList, SyncServer};
