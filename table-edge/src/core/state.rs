use std::sync::Arc;

use crate::calls::CallCoordinator;
use crate::core::{Config, SessionPolicy, SessionResult};
use crate::fanout::FanoutHub;
use crate::gateway::SessionGateway;
use crate::orders::{CatalogLookup, OrderAggregator};
use crate::storage::{RedbStorage, SessionPersistence, StorageError};
use crate::store::SessionStore;

/// Core state - 持有所有组件的共享引用
///
/// 组件之间只通过这里的 `Arc` 互相引用，克隆 `CoreState` 很便宜。
///
/// | Field | Type | Role |
/// |-------|------|------|
/// | persistence | Arc<dyn SessionPersistence> | durable commits + replay |
/// | hub | Arc<FanoutHub> | event fanout |
/// | store | Arc<SessionStore> | tables, sessions, participants |
/// | orders | Arc<OrderAggregator> | carts and orders |
/// | calls | Arc<CallCoordinator> | waiter calls |
/// | gateway | Arc<SessionGateway> | command entry point |
///
/// ```ignore
/// let state = CoreState::initialize(&Config::load(), catalog)?;
/// let mut staff = state.gateway.subscribe(Topic::location("loc-1", Audience::Staff));
/// let response = state.gateway.execute(cmd).await;
/// ```
#[derive(Clone, Debug)]
pub struct CoreState {
    pub policy: SessionPolicy,
    pub persistence: Arc<dyn SessionPersistence>,
    pub hub: Arc<FanoutHub>,
    pub store: Arc<SessionStore>,
    pub orders: Arc<OrderAggregator>,
    pub calls: Arc<CallCoordinator>,
    pub gateway: Arc<SessionGateway>,
}

impl CoreState {
    /// Open the database under `work_dir`, recover state and wire components
    ///
    /// 按顺序初始化：
    /// 1. work_dir
    /// 2. redb (work_dir/sessions.redb)
    /// 3. components + recovery from persisted state
    pub fn initialize(config: &Config, catalog: Arc<dyn CatalogLookup>) -> SessionResult<Self> {
        std::fs::create_dir_all(&config.work_dir).map_err(StorageError::from)?;
        let storage = RedbStorage::open(config.database_path())?;
        tracing::info!(path = %config.database_path().display(), "Session database opened");
        Self::build(
            config.policy.clone(),
            config.event_channel_capacity,
            Arc::new(storage),
            catalog,
        )
    }

    /// Fully in-memory core (tests and demos)
    pub fn in_memory(policy: SessionPolicy, catalog: Arc<dyn CatalogLookup>) -> SessionResult<Self> {
        let storage = RedbStorage::open_in_memory()?;
        Self::build(policy, 1024, Arc::new(storage), catalog)
    }

    /// Wire components over an existing persistence collaborator
    ///
    /// Whatever the collaborator already holds is recovered first.
    pub fn build(
        policy: SessionPolicy,
        event_channel_capacity: usize,
        persistence: Arc<dyn SessionPersistence>,
        catalog: Arc<dyn CatalogLookup>,
    ) -> SessionResult<Self> {
        let hub = Arc::new(FanoutHub::new(
            event_channel_capacity,
            Arc::clone(&persistence),
        ));
        let store = Arc::new(SessionStore::new(
            Arc::clone(&persistence),
            Arc::clone(&hub),
            policy.clone(),
        ));
        store.recover(&persistence.load()?);

        let orders = Arc::new(OrderAggregator::new(Arc::clone(&store), catalog));
        let calls = Arc::new(CallCoordinator::new(Arc::clone(&store)));
        let gateway = Arc::new(SessionGateway::new(
            Arc::clone(&store),
            Arc::clone(&orders),
            Arc::clone(&calls),
        ));

        Ok(Self {
            policy,
            persistence,
            hub,
            store,
            orders,
            calls,
            gateway,
        })
    }
}
