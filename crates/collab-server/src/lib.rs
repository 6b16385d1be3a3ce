//! Workspace collaboration core: memberships and invites, channels with
//! sequenced message fan-out, presence, and a shared kanban board, served over
//! HTTP and WebSockets.

pub mod auth;
pub mod bus;
pub mod channels;
pub mod clock;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod kanban;
pub mod locks;
pub mod membership;
pub mod permission;
pub mod presence;
pub mod routes;
pub mod store;

pub use config::Config;
pub use error::AppError;
pub use routes::{create_router, AppState};
