use std::sync::Arc;

use bastion_common::BastionError;
use tracing::*;

use crate::{ApplicationRecord, ClusterRegistry};

/// Finds the application a Host header refers to.
///
/// Every cluster's directory is scanned on each call. Results are
/// only ever reused through the session cache.
#[derive(Clone)]
pub struct AppResolver {
    registry: Arc<dyn ClusterRegistry>,
}

impl AppResolver {
    pub fn new(registry: Arc<dyn ClusterRegistry>) -> Self {
        Self { registry }
    }

    pub async fn resolve(&self, host_header: &str) -> Result<ApplicationRecord, BastionError> {
        let app_name = extract_app_name(host_header)?;

        for directory in self.registry.clusters().await? {
            let apps = directory.list_apps().await?;
            if let Some(app) = apps.into_iter().find(|app| app.name == app_name) {
                debug!(app=%app.name, cluster=%directory.cluster_name(), "Resolved application");
                return Ok(app);
            }
        }

        Err(BastionError::not_found(format!("app {app_name} not found")))
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.split_once(':') {
        // more than one colon is a bare IPv6 literal
        Some((name, port)) if !port.contains(':') => name,
        _ => host,
    }
}

/// First `.`-delimited label of the Host header, ignoring any port.
pub fn extract_app_name(host_header: &str) -> Result<String, BastionError> {
    let host = strip_port(host_header.trim());
    host.split('.')
        .find(|label| !label.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| BastionError::bad_parameter(format!("invalid host header: {host_header:?}")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::AppDirectory;

    struct Directory {
        name: &'static str,
        apps: Vec<ApplicationRecord>,
        queries: AtomicUsize,
    }

    #[async_trait]
    impl AppDirectory for Directory {
        fn cluster_name(&self) -> &str {
            self.name
        }

        async fn list_apps(&self) -> Result<Vec<ApplicationRecord>, BastionError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.apps.clone())
        }
    }

    struct Registry(Vec<Arc<Directory>>);

    #[async_trait]
    impl ClusterRegistry for Registry {
        async fn clusters(&self) -> Result<Vec<Arc<dyn AppDirectory>>, BastionError> {
            Ok(self
                .0
                .iter()
                .map(|d| d.clone() as Arc<dyn AppDirectory>)
                .collect())
        }
    }

    fn app(name: &str, addr: &str) -> ApplicationRecord {
        ApplicationRecord {
            name: name.into(),
            public_host: format!("{name}.example.com"),
            internal_addr: addr.into(),
        }
    }

    fn directory(name: &'static str, apps: Vec<ApplicationRecord>) -> Arc<Directory> {
        Arc::new(Directory {
            name,
            apps,
            queries: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_extract_app_name() {
        assert_eq!(extract_app_name("myapp.cluster.example.com").unwrap(), "myapp");
        assert_eq!(extract_app_name("myapp.example.com:8443").unwrap(), "myapp");
        assert_eq!(extract_app_name("myapp").unwrap(), "myapp");
        assert_eq!(extract_app_name(".myapp.").unwrap(), "myapp");
        assert_eq!(extract_app_name("[::1]:80").unwrap(), "::1");
    }

    #[test]
    fn test_extract_app_name_without_labels() {
        for host in ["", ".", "...", ":8080"] {
            assert!(
                matches!(extract_app_name(host), Err(BastionError::BadParameter(_))),
                "{host:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_resolve_first_matching_cluster() {
        let east = directory("east", vec![app("kibana", "10.0.0.1:5601")]);
        let west = directory("west", vec![app("grafana", "10.1.0.1:3000")]);
        let south = directory("south", vec![app("grafana", "10.2.0.1:3000")]);
        let resolver = AppResolver::new(Arc::new(Registry(vec![
            east.clone(),
            west.clone(),
            south.clone(),
        ])));

        let found = resolver.resolve("grafana.example.com").await.unwrap();
        assert_eq!(found.internal_addr, "10.1.0.1:3000");
        assert_eq!(east.queries.load(Ordering::SeqCst), 1);
        assert_eq!(south.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_requires_exact_name() {
        let resolver = AppResolver::new(Arc::new(Registry(vec![directory(
            "east",
            vec![app("grafana-old", "10.0.0.1:3000")],
        )])));

        assert!(matches!(
            resolver.resolve("grafana.example.com").await,
            Err(BastionError::NotFound(_))
        ));
        assert!(matches!(
            resolver.resolve("").await,
            Err(BastionError::BadParameter(_))
        ));
    }
}
