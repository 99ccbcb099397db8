use std::sync::Arc;

use async_trait::async_trait;
use bastion_common::{AppConfig, BastionError};

/// An application as published by a cluster's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRecord {
    pub name: String,
    pub public_host: String,
    pub internal_addr: String,
}

impl From<&AppConfig> for ApplicationRecord {
    fn from(app: &AppConfig) -> Self {
        Self {
            name: app.name.clone(),
            public_host: app.public_host.clone(),
            internal_addr: app.internal_addr.clone(),
        }
    }
}

#[async_trait]
pub trait AppDirectory: Send + Sync {
    fn cluster_name(&self) -> &str;

    async fn list_apps(&self) -> Result<Vec<ApplicationRecord>, BastionError>;
}

/// Every cluster whose directory the gateway can query, in a stable order.
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    async fn clusters(&self) -> Result<Vec<Arc<dyn AppDirectory>>, BastionError>;
}
