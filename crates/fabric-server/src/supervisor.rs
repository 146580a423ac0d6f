//! Lighthouse Supervisor: detects configuration drift for clusters that
//! opted into running their own lighthouse, materializes a per-cluster
//! config tree on disk, and supervises the child process.
//!
//! State is `cluster_id -> child handle` behind one mutex; the tick loop
//! and shutdown both acquire it, so no two ticks for the same cluster ever
//! overlap. Crash detection is polled (`try_wait`), not signal-driven, to
//! keep the logic portable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fabric_store::error::StoreError;
use fabric_store::Store;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("materialization I/O error: {0}")]
    Io(#[from] std::io::Error),
}

struct SupervisedChild {
    child: Child,
    version: i64,
}

/// Runs on every instance whose store advertises clusters with
/// `provide_lighthouse = true`.
pub struct Supervisor {
    store: Arc<Store>,
    instance_id: String,
    base_dir: PathBuf,
    binary: String,
    children: Mutex<HashMap<Uuid, SupervisedChild>>,
}

impl Supervisor {
    #[must_use]
    pub fn new(store: Arc<Store>, instance_id: String, base_dir: PathBuf, binary: String) -> Self {
        Self {
            store,
            instance_id,
            base_dir,
            binary,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Background task: run one tick every `interval` until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        info!(?interval, "supervisor tick task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(%err, "supervisor tick failed, will retry next cycle");
                    }
                }
                _ = shutdown.changed() => {
                    info!("supervisor shutting down, stopping all children");
                    self.stop_all().await;
                    return;
                }
            }
        }
    }

    /// One pass: reconverge clusters behind, then probe live children.
    async fn tick(&self) -> Result<(), SupervisorError> {
        let clusters = self.store.list_lighthouse_clusters().await?;

        for cluster in &clusters {
            let running_version = match self
                .store
                .get_running_version(cluster.id, &self.instance_id)
                .await
            {
                Ok(state) => state.running_config_version,
                Err(StoreError::NotFound) => 0,
                Err(err) => return Err(err.into()),
            };

            let has_child = self.children.lock().await.contains_key(&cluster.id);
            let behind = cluster.config_version > running_version;

            if behind || !has_child {
                self.converge(cluster).await?;
            }
        }

        self.probe_children().await;
        Ok(())
    }

    /// Materialize the config tree, stop any existing child, spawn a new
    /// one, and record the new `running_config_version`.
    async fn converge(
        &self,
        cluster: &fabric_core::models::Cluster,
    ) -> Result<(), SupervisorError> {
        let cluster_dir = self.base_dir.join(cluster.id.to_string());
        materialize(&cluster_dir, cluster)?;

        let mut children = self.children.lock().await;
        if let Some(existing) = children.remove(&cluster.id) {
            stop_child(existing.child).await;
        }

        let config_path = cluster_dir.join("config.yml");
        let child = Command::new(&self.binary)
            .arg("-config")
            .arg(&config_path)
            .kill_on_drop(true)
            .spawn()
            .map_err(SupervisorError::Io)?;

        children.insert(
            cluster.id,
            SupervisedChild {
                child,
                version: cluster.config_version,
            },
        );
        drop(children);

        self.store
            .set_running_version(cluster.id, &self.instance_id, cluster.config_version)
            .await?;

        info!(
            cluster_id = %cluster.id,
            version = cluster.config_version,
            "supervisor tick: cluster converged"
        );
        Ok(())
    }

    /// Poll every live child; if one has exited, log it and drop it from
    /// the map so the next tick's `!has_child` check respawns it.
    async fn probe_children(&self) {
        let mut children = self.children.lock().await;
        let mut dead = Vec::new();

        for (cluster_id, supervised) in children.iter_mut() {
            match supervised.child.try_wait() {
                Ok(Some(status)) => {
                    warn!(%cluster_id, ?status, "lighthouse child exited, will respawn next tick");
                    dead.push(*cluster_id);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%cluster_id, %err, "failed to probe lighthouse child");
                }
            }
        }

        for cluster_id in dead {
            children.remove(&cluster_id);
        }
    }

    /// Stop every supervised child. Called on graceful shutdown.
    async fn stop_all(&self) {
        let mut children = self.children.lock().await;
        for (cluster_id, supervised) in children.drain() {
            info!(%cluster_id, version = supervised.version, "stopping lighthouse child");
            stop_child(supervised.child).await;
        }
    }

    #[cfg(test)]
    async fn child_count(&self) -> usize {
        self.children.lock().await.len()
    }
}

/// Graceful-then-forceful stop: SIGTERM, wait up to 5s, then kill.
async fn stop_child(mut child: Child) {
    if let Some(pid) = child.id() {
        send_terminate(pid);
    }

    match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            warn!("lighthouse child did not exit within 5s, killing");
            let _ = child.kill().await;
        }
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) {
    // SAFETY: `kill` with a valid pid and SIGTERM is a well-defined POSIX
    // call; failure (e.g. the process already exited) is not a safety
    // concern, only reflected in the return value, which we ignore.
    #[allow(unsafe_code)]
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) {}

/// Write the cluster's PKI blobs and a Nebula-style `config.yml` into
/// `cluster_dir`, using write-then-rename so a partially written file is
/// never visible to a starting child. The directory itself is created with
/// owner-only permissions; each file likewise.
fn materialize(
    cluster_dir: &Path,
    cluster: &fabric_core::models::Cluster,
) -> Result<(), SupervisorError> {
    std::fs::create_dir_all(cluster_dir)?;
    set_owner_only_dir(cluster_dir)?;

    let ca_cert = cluster.ca_cert.as_deref().unwrap_or_default();
    let ca_key = cluster.ca_key.as_deref().unwrap_or_default();
    let crl = cluster.crl.as_deref().unwrap_or_default();
    let config_yml = render_config(cluster);

    write_atomic(cluster_dir, "ca.crt", ca_cert)?;
    write_atomic(cluster_dir, "crl.pem", crl)?;
    write_atomic(cluster_dir, "host.crt", ca_cert)?;
    write_atomic(cluster_dir, "host.key", ca_key)?;
    write_atomic(cluster_dir, "config.yml", config_yml.as_bytes())?;

    Ok(())
}

/// Compose a Nebula-style lighthouse config document. The TUN device name
/// is derived from a prefix of the cluster id so it stays short and unique.
fn render_config(cluster: &fabric_core::models::Cluster) -> String {
    let tun_name = format!("fab{}", &cluster.id.simple().to_string()[..8]);
    let port = cluster.lighthouse_port.unwrap_or(4242);
    format!(
        "pki:\n  ca: ca.crt\n  cert: host.crt\n  key: host.key\n  \
         crl: crl.pem\nlighthouse:\n  am_lighthouse: true\n  \
         interval: 60\nlisten:\n  host: 0.0.0.0\n  port: {port}\ntun:\n  \
         dev: {tun_name}\nfirewall:\n  outbound:\n    - port: any\n      proto: any\n      host: any\n  \
         inbound:\n    - port: any\n      proto: any\n      host: any\n"
    )
}

fn write_atomic(dir: &Path, name: &str, data: &[u8]) -> Result<(), SupervisorError> {
    let tmp_path = dir.join(format!(".{name}.tmp"));
    let final_path = dir.join(name);

    std::fs::write(&tmp_path, data)?;
    set_owner_only_file(&tmp_path)?;
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_owner_only_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_file(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only_file(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    async fn supervisor_with_store(binary: &str) -> (Supervisor, TempDir, NamedTempFile) {
        let db = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::connect(db.path().to_str().unwrap()).await.unwrap());
        let base_dir = TempDir::new().unwrap();
        (
            Supervisor::new(store, "inst-a".to_owned(), base_dir.path().to_path_buf(), binary.to_owned()),
            base_dir,
            db,
        )
    }

    #[tokio::test]
    async fn materialize_writes_owner_only_config() {
        let (sup, _base_dir, _db) = supervisor_with_store("true").await;
        let tenant = sup.store.create_tenant("Acme").await.unwrap();
        let cluster = sup
            .store
            .create_cluster(tenant.id, "prod", "chash", true, Some(4242))
            .await
            .unwrap();

        let cluster_dir = sup.base_dir.join(cluster.id.to_string());
        materialize(&cluster_dir, &cluster).unwrap();

        assert!(cluster_dir.join("config.yml").exists());
        assert!(cluster_dir.join("ca.crt").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&cluster_dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[tokio::test]
    async fn tick_converges_and_spawns_child() {
        let (sup, _base_dir, _db) = supervisor_with_store("true").await;
        let tenant = sup.store.create_tenant("Acme").await.unwrap();
        sup.store
            .create_cluster(tenant.id, "prod", "chash", true, Some(4242))
            .await
            .unwrap();

        sup.tick().await.unwrap();
        assert_eq!(sup.child_count().await, 1);
    }

    #[tokio::test]
    async fn tick_respawns_after_crash() {
        let (sup, _base_dir, _db) = supervisor_with_store("true").await;
        let tenant = sup.store.create_tenant("Acme").await.unwrap();
        sup.store
            .create_cluster(tenant.id, "prod", "chash", true, Some(4242))
            .await
            .unwrap();

        sup.tick().await.unwrap();
        // `true` exits immediately; give it a moment to actually exit.
        tokio::time::sleep(Duration::from_millis(100)).await;
        sup.tick().await.unwrap();
        assert_eq!(sup.child_count().await, 1);
    }
}
