use std::sync::Arc;

use async_trait::async_trait;
use bastion_common::{BastionConfig, BastionError, ClusterConfig};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::*;

use crate::{AccessChecker, AppDirectory, ApplicationRecord, ClusterRegistry, Identity, IdentitySource};

/// Clusters and their apps as listed in the config file.
///
/// Reads the shared config on every call so reloads are picked up.
pub struct StaticClusterRegistry {
    config: Arc<Mutex<BastionConfig>>,
}

impl StaticClusterRegistry {
    pub fn new(config: Arc<Mutex<BastionConfig>>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClusterRegistry for StaticClusterRegistry {
    async fn clusters(&self) -> Result<Vec<Arc<dyn AppDirectory>>, BastionError> {
        let config = self.config.lock().await;
        Ok(config
            .store
            .clusters
            .iter()
            .map(|cluster| Arc::new(StaticAppDirectory::from(cluster)) as Arc<dyn AppDirectory>)
            .collect())
    }
}

pub struct StaticAppDirectory {
    name: String,
    apps: Vec<ApplicationRecord>,
}

impl From<&ClusterConfig> for StaticAppDirectory {
    fn from(cluster: &ClusterConfig) -> Self {
        Self {
            name: cluster.name.clone(),
            apps: cluster.apps.iter().map(ApplicationRecord::from).collect(),
        }
    }
}

#[async_trait]
impl AppDirectory for StaticAppDirectory {
    fn cluster_name(&self) -> &str {
        &self.name
    }

    async fn list_apps(&self) -> Result<Vec<ApplicationRecord>, BastionError> {
        Ok(self.apps.clone())
    }
}

/// Session tokens issued ahead of time in the config file.
pub struct ConfigIdentitySource {
    config: Arc<Mutex<BastionConfig>>,
}

impl ConfigIdentitySource {
    pub fn new(config: Arc<Mutex<BastionConfig>>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl IdentitySource for ConfigIdentitySource {
    async fn authenticate(
        &self,
        token: &str,
    ) -> Result<(Identity, Arc<dyn AccessChecker>), BastionError> {
        let config = self.config.lock().await;
        for user in &config.store.users {
            if let Some(issued) = user
                .tokens
                .iter()
                .find(|t| token_matches(t.token.expose_secret(), token))
            {
                let identity = Identity {
                    username: user.username.clone(),
                    app_host: issued.app_host.clone(),
                };
                let checker = PolicyAccessChecker::new(self.config.clone(), &user.username);
                return Ok((identity, Arc::new(checker)));
            }
        }
        debug!("Unknown session token");
        Err(BastionError::AuthenticationFailed)
    }
}

fn token_matches(issued: &str, presented: &str) -> bool {
    issued.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Evaluates a user's `allowed_apps` against the config as it is now.
pub struct PolicyAccessChecker {
    config: Arc<Mutex<BastionConfig>>,
    username: String,
}

impl PolicyAccessChecker {
    pub fn new(config: Arc<Mutex<BastionConfig>>, username: &str) -> Self {
        Self {
            config,
            username: username.to_owned(),
        }
    }
}

#[async_trait]
impl AccessChecker for PolicyAccessChecker {
    async fn check_access_to_app(&self, app: &ApplicationRecord) -> Result<(), BastionError> {
        let config = self.config.lock().await;
        match config.store.find_user(&self.username) {
            Some(user) if user.may_access(&app.name) => Ok(()),
            Some(_) => {
                info!(user=%self.username, app=%app.name, "Access denied by policy");
                Err(BastionError::AccessDenied)
            }
            None => {
                info!(user=%self.username, "User no longer exists");
                Err(BastionError::AccessDenied)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bastion_common::{AppConfig, BastionConfigStore, Secret, SessionTokenConfig, UserConfig};

    use super::*;

    fn config() -> Arc<Mutex<BastionConfig>> {
        let store = BastionConfigStore {
            clusters: vec![
                ClusterConfig {
                    name: "east".into(),
                    apps: vec![AppConfig {
                        name: "grafana".into(),
                        public_host: "grafana.east.example.com".into(),
                        internal_addr: "10.0.0.5:3000".into(),
                    }],
                },
                ClusterConfig {
                    name: "west".into(),
                    apps: vec![],
                },
            ],
            users: vec![UserConfig {
                username: "alice".into(),
                tokens: vec![SessionTokenConfig {
                    token: Secret::new("tok-alice".into()),
                    app_host: "grafana.east.example.com".into(),
                }],
                allowed_apps: vec!["grafana".into()],
            }],
            ..Default::default()
        };
        Arc::new(Mutex::new(BastionConfig {
            store,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_registry_lists_clusters_in_order() {
        let registry = StaticClusterRegistry::new(config());
        let clusters = registry.clusters().await.unwrap();
        let names: Vec<_> = clusters.iter().map(|c| c.cluster_name().to_owned()).collect();
        assert_eq!(names, vec!["east", "west"]);
        assert_eq!(clusters[0].list_apps().await.unwrap()[0].name, "grafana");
    }

    #[tokio::test]
    async fn test_identity_from_token() {
        let source = ConfigIdentitySource::new(config());
        let (identity, _) = source.authenticate("tok-alice").await.unwrap();
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.app_host, "grafana.east.example.com");

        assert!(matches!(
            source.authenticate("tok-mallory").await,
            Err(BastionError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_token_must_match_exactly() {
        let source = ConfigIdentitySource::new(config());
        for token in ["", "tok-alic", "tok-alice ", "TOK-ALICE"] {
            assert!(source.authenticate(token).await.is_err(), "{token:?}");
        }
        assert!(token_matches("tok-alice", "tok-alice"));
        assert!(!token_matches("tok-alice", "tok-alicf"));
    }

    #[tokio::test]
    async fn test_policy_follows_config_changes() {
        let config = config();
        let source = ConfigIdentitySource::new(config.clone());
        let (_, checker) = source.authenticate("tok-alice").await.unwrap();
        let app = ApplicationRecord::from(&config.lock().await.store.clusters[0].apps[0]);

        checker.check_access_to_app(&app).await.unwrap();

        config.lock().await.store.users[0].allowed_apps.clear();
        assert!(matches!(
            checker.check_access_to_app(&app).await,
            Err(BastionError::AccessDenied)
        ));

        config.lock().await.store.users.clear();
        assert!(matches!(
            checker.check_access_to_app(&app).await,
            Err(BastionError::AccessDenied)
        ));
    }
}
