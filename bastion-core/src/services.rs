use std::sync::Arc;

use anyhow::Result;
use bastion_common::BastionConfig;
use tokio::sync::Mutex;
use tracing::*;

use crate::config_providers::{ConfigIdentitySource, StaticClusterRegistry};
use crate::{AppResolver, SessionCache, SystemClock};

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Mutex<BastionConfig>>,
    pub resolver: AppResolver,
    pub session_cache: Arc<SessionCache>,
}

impl Services {
    pub async fn new(config: BastionConfig) -> Result<Self> {
        let session_ttl = config.store.http.session_ttl;
        let vacuum_interval = config.store.http.vacuum_interval;
        let config = Arc::new(Mutex::new(config));

        let resolver = AppResolver::new(Arc::new(StaticClusterRegistry::new(config.clone())));
        let session_cache = Arc::new(SessionCache::new(
            Arc::new(ConfigIdentitySource::new(config.clone())),
            resolver.clone(),
            Arc::new(SystemClock),
            session_ttl,
        ));

        tokio::spawn({
            let session_cache = session_cache.clone();
            async move {
                loop {
                    tokio::time::sleep(vacuum_interval).await;
                    session_cache.vacuum().await;
                    trace!("Session cache vacuumed");
                }
            }
        });

        Ok(Self {
            config,
            resolver,
            session_cache,
        })
    }
}
