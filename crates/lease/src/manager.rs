//! Lease manager
//!
//! Per environment, the output directory holds `NAME.claim` (the claim id,
//! the source of truth for cleanup) and `NAME.kubeconfig` (the credentials).
//! The two are written separately: losing the credentials never loses the id.

use crate::broker::LeaseBroker;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use testbench_config::TestbenchConfig;
use testbench_core::{EnvironmentName, Error, Result, CLAIM_SUFFIX};
use testbench_utils::atomic_file::{remove_if_exists, write_atomic, write_atomic_string};
use uuid::Uuid;

/// A claimed cluster and where its credentials were stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterClaim {
    pub environment: String,
    pub id: String,
    pub credentials: PathBuf,
}

/// `{slug}-{user}-{uuid}`, unique per call
pub fn generate_claim_id(environment: &EnvironmentName, user: &str) -> String {
    format!("{}-{}-{}", environment.slug(), user, Uuid::new_v4())
}

pub struct LeaseManager {
    config: Arc<TestbenchConfig>,
    broker: Arc<dyn LeaseBroker>,
}

impl LeaseManager {
    pub fn new(config: Arc<TestbenchConfig>, broker: Arc<dyn LeaseBroker>) -> Self {
        Self { config, broker }
    }

    /// The persisted claim id of `environment`, if any
    pub fn claim_id(&self, environment: &str) -> Result<Option<String>> {
        let path = self.config.claim_path(environment);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let id = content.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::file_system(path, "read claim id", e)),
        }
    }

    /// Claim a fresh cluster for `environment` and store its credentials
    pub async fn claim(&self, environment: &EnvironmentName) -> Result<ClusterClaim> {
        let name = environment.as_str();

        // A claim left behind by an earlier run occupies the same slot
        if let Some(previous) = self.claim_id(name)? {
            tracing::info!(environment = %name, claim_id = %previous, "releasing previous claim");
            if let Err(e) = self.broker.delete(&previous).await {
                tracing::warn!(environment = %name, claim_id = %previous, error = %e, "could not delete previous claim");
            }
        }

        let id = generate_claim_id(environment, &self.config.user);
        let claim_path = self.config.claim_path(name);
        write_atomic_string(&claim_path, &format!("{id}\n"))
            .map_err(|e| Error::lease_with_source(name, "failed to persist claim id", e))?;

        if let Err(e) = self.broker.delete(&id).await {
            tracing::debug!(environment = %name, claim_id = %id, error = %e, "no stale claim to delete");
        }

        self.broker.create(&id).await.map_err(|e| {
            Error::lease_with_source(name, format!("failed to create claim '{id}'"), e)
        })?;
        tracing::info!(environment = %name, claim_id = %id, pool = %self.config.lease_pool, "claimed cluster");

        let credentials = self.broker.credentials(&id).await.map_err(|e| {
            Error::lease_with_source(name, format!("failed to fetch credentials for '{id}'"), e)
        })?;
        if credentials.is_empty() {
            return Err(Error::lease(
                name,
                format!("broker returned empty credentials for '{id}'"),
            ));
        }
        let credential_path = self.config.credential_path(name);
        write_atomic(&credential_path, &credentials)
            .map_err(|e| Error::lease_with_source(name, "failed to store credentials", e))?;

        Ok(ClusterClaim {
            environment: name.to_string(),
            id,
            credentials: credential_path,
        })
    }

    /// Release the claim of `environment`, if there is one.
    ///
    /// Returns whether a claim id was found. Safe to call repeatedly and when
    /// `claim` never ran or failed halfway.
    pub async fn release(&self, environment: &str) -> Result<bool> {
        let id = self.claim_id(environment)?;
        if let Some(id) = &id {
            match self.broker.delete(id).await {
                Ok(()) => tracing::info!(environment = %environment, claim_id = %id, "released claim"),
                Err(e) => {
                    tracing::warn!(environment = %environment, claim_id = %id, error = %e, "could not delete claim")
                }
            }
        }

        remove_if_exists(&self.config.claim_path(environment))?;
        remove_if_exists(&self.config.credential_path(environment))?;
        Ok(id.is_some())
    }

    /// Environments with a claim file in the output directory, sorted
    pub fn claimed_environments(&self) -> Result<Vec<String>> {
        let dir = &self.config.output_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::file_system(dir, "read output directory", e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::file_system(dir, "read directory entry", e))?;
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_string_lossy().strip_suffix(CLAIM_SUFFIX) {
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeBroker {
        active: Mutex<BTreeSet<String>>,
        deleted: Mutex<Vec<String>>,
        fail_credentials: bool,
    }

    #[async_trait]
    impl LeaseBroker for FakeBroker {
        async fn delete(&self, claim_id: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(claim_id.to_string());
            if self.active.lock().unwrap().remove(claim_id) {
                Ok(())
            } else {
                Err(Error::command_execution("knaut", vec![], "no such claim", Some(1)))
            }
        }

        async fn create(&self, claim_id: &str) -> Result<()> {
            self.active.lock().unwrap().insert(claim_id.to_string());
            Ok(())
        }

        async fn credentials(&self, claim_id: &str) -> Result<Vec<u8>> {
            if self.fail_credentials {
                return Err(Error::command_execution("knaut", vec![], "timeout", Some(1)));
            }
            Ok(format!("kubeconfig for {claim_id}\n").into_bytes())
        }
    }

    fn setup(broker: FakeBroker) -> (TempDir, Arc<FakeBroker>, LeaseManager) {
        let temp = TempDir::new().unwrap();
        let config = TestbenchConfig {
            output_dir: temp.path().to_path_buf(),
            user: "ci".to_string(),
            ..Default::default()
        };
        let broker = Arc::new(broker);
        let manager = LeaseManager::new(Arc::new(config), broker.clone());
        (temp, broker, manager)
    }

    fn name(s: &str) -> EnvironmentName {
        EnvironmentName::new(s).unwrap()
    }

    #[test]
    fn test_claim_id_format() {
        let id = generate_claim_id(&name("Fedora_31"), "ci");
        let uuid = id.strip_prefix("fedora-31-ci-").unwrap();
        assert!(Uuid::parse_str(uuid).is_ok());
    }

    #[tokio::test]
    async fn test_claim_stores_id_and_credentials() {
        let (temp, broker, manager) = setup(FakeBroker::default());
        let claim = manager.claim(&name("alpha")).await.unwrap();

        assert!(claim.id.starts_with("alpha-ci-"));
        assert_eq!(manager.claim_id("alpha").unwrap(), Some(claim.id.clone()));
        assert_eq!(claim.credentials, temp.path().join("alpha.kubeconfig"));
        assert_eq!(
            fs::read_to_string(&claim.credentials).unwrap(),
            format!("kubeconfig for {}\n", claim.id)
        );
        assert!(broker.active.lock().unwrap().contains(&claim.id));
    }

    #[tokio::test]
    async fn test_concurrent_claims_do_not_collide() {
        let (_temp, _broker, manager) = setup(FakeBroker::default());
        let alpha = name("alpha");
        let beta = name("beta");
        let (a, b) = tokio::join!(manager.claim(&alpha), manager.claim(&beta));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.id, b.id);
        assert_ne!(a.credentials, b.credentials);
    }

    #[tokio::test]
    async fn test_release_without_claim_is_noop() {
        let (_temp, broker, manager) = setup(FakeBroker::default());
        assert!(!manager.release("alpha").await.unwrap());
        assert!(!manager.release("alpha").await.unwrap());
        assert!(broker.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (temp, broker, manager) = setup(FakeBroker::default());
        let claim = manager.claim(&name("alpha")).await.unwrap();

        assert!(manager.release("alpha").await.unwrap());
        assert!(!temp.path().join("alpha.claim").exists());
        assert!(!claim.credentials.exists());
        assert!(broker.active.lock().unwrap().is_empty());

        assert!(!manager.release("alpha").await.unwrap());
    }

    #[tokio::test]
    async fn test_id_survives_credential_failure() {
        let (temp, broker, manager) = setup(FakeBroker {
            fail_credentials: true,
            ..Default::default()
        });
        let err = manager.claim(&name("alpha")).await.unwrap_err();
        assert!(matches!(err, Error::Lease { ref environment, .. } if environment == "alpha"));
        assert!(!temp.path().join("alpha.kubeconfig").exists());

        let id = manager.claim_id("alpha").unwrap().unwrap();
        assert!(broker.active.lock().unwrap().contains(&id));

        manager.release("alpha").await.unwrap();
        assert!(broker.active.lock().unwrap().is_empty());
        assert_eq!(broker.deleted.lock().unwrap().last(), Some(&id));
    }

    #[tokio::test]
    async fn test_reclaim_releases_previous_claim() {
        let (_temp, broker, manager) = setup(FakeBroker::default());
        let first = manager.claim(&name("alpha")).await.unwrap();
        let second = manager.claim(&name("alpha")).await.unwrap();

        assert_ne!(first.id, second.id);
        let active = broker.active.lock().unwrap();
        assert!(!active.contains(&first.id));
        assert!(active.contains(&second.id));
    }

    #[tokio::test]
    async fn test_claimed_environments() {
        let (temp, _broker, manager) = setup(FakeBroker::default());
        manager.claim(&name("beta")).await.unwrap();
        fs::write(temp.path().join("orphan.claim"), "orphan-ci-1\n").unwrap();
        fs::write(temp.path().join("alpha.osi"), "").unwrap();

        assert_eq!(manager.claimed_environments().unwrap(), ["beta", "orphan"]);
    }
}
