//! Core module - 配置、错误与组件装配

pub mod config;
pub mod error;
pub mod state;

pub use config::{ClosePolicy, Config, SessionPolicy};
pub use error::{SessionError, SessionResult};
pub use state::CoreState;
