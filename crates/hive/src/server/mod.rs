//! HTTP & WebSocket Boundary
//!
//! The thin layer between the outside world and the registry: project
//! route dispatch, the action trigger contract, stats, health, and the
//! WebSocket session channel that carries dialog frames and runtime
//! events.

mod handler;
mod router;
mod state;

pub use router::create_router;
pub use state::AppState;
