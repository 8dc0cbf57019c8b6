#![allow(non_snake_case)]

// Модель и ошибки
pub mod error;
pub mod record;

// Хранилище и фоновый снапшот
pub mod scheduler;
pub mod store; // src/store/{mod,core,persist}.rs

// Старт/shutdown и HTTP
pub mod lifecycle; // src/lifecycle/{mod,gate,inflight}.rs
pub mod server; // src/server/{mod,routes,middleware,http}.rs

// Окружение
pub mod cli;
pub mod config;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod util;

// Удобные реэкспорты
pub use config::ServerConfig;
pub use error::{StoreError, StoreResult};
pub use lifecycle::{Coordinator, ShutdownError};
pub use record::{Bookmark, BookmarkId};
pub use scheduler::{SchedulerError, SnapshotScheduler};
pub use store::{Collection, Store};
