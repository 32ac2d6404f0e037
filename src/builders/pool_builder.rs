//! Builders to construct scheduler pools from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::{PoolConfig, SchedulerConfig};
use crate::core::{Reconciler, Scheduler, SchedulerError, SharedEventSink, StateStore};
use crate::runtime::{PoolState, SchedulerPool};

/// Build one [`SchedulerPool`] per configured pool using the provided factories.
///
/// `store_factory` receives the initial state for the pool, with the
/// reconciler configured from the pool's `sort_updates_by_time`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// `SchedulerError::InvalidConfig` for an invalid configuration, or the
/// first error returned by a factory.
pub fn build_pools<S, St, FS, FT, FD>(
    cfg: &SchedulerConfig,
    mut scheduler_factory: FS,
    mut store_factory: FT,
    mut durable_sink_factory: FD,
) -> Result<HashMap<String, SchedulerPool<S>>, SchedulerError>
where
    S: Scheduler + 'static,
    St: StateStore<PoolState<S>>,
    FS: FnMut(&str, &PoolConfig) -> Result<S, SchedulerError>,
    FT: FnMut(&str, &PoolConfig, PoolState<S>) -> Result<Arc<St>, SchedulerError>,
    FD: FnMut(&str, &PoolConfig) -> Result<SharedEventSink, SchedulerError>,
{
    cfg.validate()?;

    let mut pools = HashMap::with_capacity(cfg.pools.len());
    for (name, pool_cfg) in &cfg.pools {
        let scheduler = scheduler_factory(name, pool_cfg)?;
        let reconciler = Reconciler::new().with_update_sorting(pool_cfg.sort_updates_by_time);
        let store = store_factory(name, pool_cfg, PoolState::new(scheduler, reconciler))?;
        let durable_sink = durable_sink_factory(name, pool_cfg)?;

        let pool = SchedulerPool::from_config(name, store, pool_cfg, durable_sink);
        info!(pool = %name, batch_window_ms = pool_cfg.batch_window_ms, "pool built");
        pools.insert(name.clone(), pool);
    }

    Ok(pools)
}
