pub mod api;
pub mod router;
pub mod scanner;
pub mod server;
pub mod state;

pub use server::GatewayServer;
pub use state::{AppState, SharedState, Stores};
