//! Table Edge - 餐桌会话协调核心
//!
//! Turns one physical table into a shared, real-time ordering surface for
//! every diner sitting at it.
//!
//! - **Session Store** (`store`): tables, sessions, participants, and the
//!   per-session mutation boundary
//! - **Cart/Order Aggregator** (`orders`): carts, order lines, totals
//! - **Call Coordinator** (`calls`): waiter calls, one open call per table
//! - **Event Fanout Hub** (`fanout`): ordered push to sessions, tables and
//!   location audiences
//! - **Session Gateway** (`gateway`): command entry point with roles and
//!   idempotency
//!
//! # 模块结构
//!
//! ```text
//! table-edge/src/
//! ├── core/          # config, errors, wiring
//! ├── storage/       # persistence collaborator (redb)
//! ├── store/         # Session Store
//! ├── orders/        # aggregator, money, catalog collaborator
//! ├── calls/         # Call Coordinator
//! ├── fanout/        # Event Fanout Hub
//! ├── gateway/       # Session Gateway
//! └── utils/         # logger
//! ```

pub mod calls;
pub mod core;
pub mod fanout;
pub mod gateway;
pub mod orders;
pub mod storage;
pub mod store;
pub mod utils;

// Re-export 公共类型
pub use calls::CallCoordinator;
pub use crate::core::{ClosePolicy, Config, CoreState, SessionError, SessionPolicy, SessionResult};
pub use fanout::{Audience, FanoutHub, Subscription, SubscriptionError, Topic};
pub use gateway::SessionGateway;
pub use orders::{CatalogError, CatalogItem, CatalogLookup, InMemoryCatalog, OrderAggregator};
pub use storage::{RedbStorage, SessionPersistence, StorageError};
pub use store::SessionStore;

pub use utils::logger::{init_logger, init_logger_with_file};
