pub mod album;
pub mod app;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod guard;
pub mod handlers;
pub mod models;
pub mod mutations;
pub mod state;
pub mod storage;
pub mod sync;
pub mod views;

pub use app::router;
pub use config::Config;
pub use errors::{AppError, SyncError};
pub use gateway::{Action, Envelope, Gateway, HttpGateway};
pub use state::{AppState, Outcome, SyncPhase};
pub use storage::{CacheStore, FileStore, KeyValueStore, MemoryStore};
