use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bastion_common::helpers::fs::secure_file;
use bastion_common::{BastionConfig, BastionConfigStore};
use config::{Config, Environment, File};
use notify::{RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tracing::*;

pub fn load_config(path: &Path, secure: bool) -> Result<BastionConfig> {
    if secure {
        secure_file(path).context("Could not secure config")?;
    }

    let store: BastionConfigStore = Config::builder()
        .add_source(File::from(path))
        .add_source(
            Environment::with_prefix("BASTION")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .context("Could not load config")?
        .try_deserialize()
        .context("Could not parse config")?;

    store.validate().context("Invalid config")?;

    let config = BastionConfig {
        store,
        paths_relative_to: path.parent().map(Path::to_path_buf).unwrap_or_default(),
    };

    info!(
        "Using config: {path:?} (clusters: {}, users: {})",
        config.store.clusters.len(),
        config.store.users.len(),
    );
    Ok(config)
}

/// Reloads the config whenever the file changes.
///
/// Access checks and token lookups see the new contents on their next call.
/// Listeners and SSH trust settings keep what they were started with.
pub async fn watch_config<P: AsRef<Path>>(path: P, config: Arc<Mutex<BastionConfig>>) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(1);
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.blocking_send(res);
    })?;
    watcher.watch(path.as_ref(), RecursiveMode::NonRecursive)?;

    loop {
        match rx.recv().await {
            Some(Ok(event)) => {
                if event.kind.is_modify() {
                    match load_config(path.as_ref(), false) {
                        Ok(new_config) => {
                            *(config.lock().await) = new_config;
                            info!("Reloaded config");
                        }
                        Err(error) => error!(?error, "Failed to reload config"),
                    }
                }
            }
            Some(Err(error)) => error!(?error, "Failed to watch config"),
            None => {
                error!("Config watch failed");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("bastion-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.yaml", contents.len()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_config() {
        let path = write_config(
            r#"
ssh:
  enable: false
http:
  listen: 127.0.0.1:8888
clusters:
  - name: prod
    apps:
      - name: grafana
        public_host: grafana.prod.example.com
        internal_addr: http://127.0.0.1:3000
"#,
        );
        let config = load_config(&path, true).unwrap();
        assert_eq!(config.store.clusters.len(), 1);
        assert_eq!(config.store.http.listen.port(), 8888);
        assert_eq!(config.paths_relative_to, path.parent().unwrap());
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let path = write_config(
            r#"
ssh:
  enable: false
clusters:
  - name: prod
    apps:
      - name: a.b
        public_host: a.b.example.com
        internal_addr: http://127.0.0.1:3000
"#,
        );
        assert!(load_config(&path, false).is_err());
    }
}
