//! Image realization stage
//!
//! `realize` is idempotent: the builder only runs when the fingerprint is
//! stale or the image is missing. The fingerprint record is dropped before a
//! build starts and written again only after the build succeeds, so an image
//! left behind by a failed or interrupted build is never mistaken for valid.

use crate::builder::{BuildRequest, ImageBuilder};
use crate::fingerprint::FingerprintStore;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use testbench_config::{EnvironmentSpec, TestbenchConfig};
use testbench_core::{Error, Result};
use tokio::sync::OnceCell;

/// A realized image in the output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub environment: String,
    pub path: PathBuf,
    /// Whether this call invoked the builder
    pub rebuilt: bool,
}

pub struct ImageRealizer {
    config: Arc<TestbenchConfig>,
    store: FingerprintStore,
    builder: Arc<dyn ImageBuilder>,
    cache_ready: OnceCell<()>,
}

impl ImageRealizer {
    pub fn new(config: Arc<TestbenchConfig>, builder: Arc<dyn ImageBuilder>) -> Self {
        Self {
            store: FingerprintStore::new(Arc::clone(&config)),
            config,
            builder,
            cache_ready: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// Create the shared builder cache once per realizer
    async fn ensure_cache_dir(&self) -> Result<()> {
        self.cache_ready
            .get_or_try_init(|| async {
                let dir = &self.config.cache_dir;
                if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| Error::file_system(parent, "create output directory", e))?;
                }
                match tokio::fs::create_dir(dir).await {
                    Ok(()) => {
                        tracing::debug!(cache_dir = %dir.display(), "created builder cache");
                        Ok(())
                    }
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
                    Err(e) => Err(Error::file_system(dir, "create builder cache", e)),
                }
            })
            .await
            .map(|_| ())
    }

    /// Produce or reuse the image of `spec`
    pub async fn realize(&self, spec: &EnvironmentSpec) -> Result<ImageArtifact> {
        let environment = spec.name.to_string();
        let image = self.config.image_path(&environment);

        self.ensure_cache_dir().await?;

        let (fingerprint, stale) = {
            let store = self.store.clone();
            let spec = spec.clone();
            tokio::task::spawn_blocking(move || -> Result<_> {
                let fingerprint = store.compute(&spec)?;
                let stale = store.differs(spec.name.as_str(), &fingerprint)?;
                Ok((fingerprint, stale))
            })
            .await
            .map_err(|e| Error::configuration(format!("fingerprint task failed: {e}")))??
        };

        let present = tokio::fs::try_exists(&image).await.unwrap_or(false);
        if !stale && present {
            testbench_utils::tracing::cache_event(&environment, true);
            return Ok(ImageArtifact {
                environment,
                path: image,
                rebuilt: false,
            });
        }
        testbench_utils::tracing::cache_event(&environment, false);

        self.store
            .invalidate(&environment)
            .map_err(|e| Error::build_failed(&environment, e))?;

        let request = BuildRequest::new(spec, self.config.cache_dir.clone(), image.clone());
        let started = Instant::now();
        if let Err(e) = self.builder.build(&request).await {
            tracing::error!(environment = %environment, error = %e, "image build failed");
            return Err(Error::build_failed(&environment, e));
        }

        if !tokio::fs::try_exists(&image).await.unwrap_or(false) {
            return Err(Error::build_failed(
                &environment,
                Error::configuration(format!(
                    "builder reported success but '{}' does not exist",
                    image.display()
                )),
            ));
        }

        self.store
            .record_fingerprint(&environment, &fingerprint)
            .map_err(|e| Error::build_failed(&environment, e))?;

        tracing::info!(
            environment = %environment,
            duration_ms = %started.elapsed().as_millis(),
            "image built"
        );
        Ok(ImageArtifact {
            environment,
            path: image,
            rebuilt: true,
        })
    }
}
