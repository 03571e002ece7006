//! Execution driver
//!
//! Runs one environment through its pipeline steps in order:
//!
//! 1. `IMAGE_COPIED`: the realized image is copied to a disposable working
//!    image, so the cached artifact is never booted.
//! 2. `CREDENTIALS_INJECTED`: the lease credentials are placed in the working
//!    image.
//! 3. `COMMAND_INJECTED`: the harness and test command are staged.
//! 4. `BOOTED`: the working image boots and runs the command to completion.
//! 5. `RESULT_EXTRACTED`: the result stream is copied out and checked for
//!    its exit trailer.
//!
//! A failing step stops the pipeline and the working image is left in place
//! for inspection. It is only removed after a successful extraction.

use crate::harness::{self, Harness};
use crate::hypervisor::Hypervisor;
use crate::image_access::ImageAccess;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use testbench_cache::ImageArtifact;
use testbench_config::TestbenchConfig;
use testbench_core::{Error, PipelineStep, Result};
use testbench_lease::ClusterClaim;
use testbench_report::ExecutionResult;
use testbench_utils::atomic_file::{remove_if_exists, write_if_changed};
use testbench_utils::tracing::{pipeline_span, step_completed};
use tracing::Instrument;

pub struct ExecutionDriver {
    config: Arc<TestbenchConfig>,
    access: Arc<dyn ImageAccess>,
    hypervisor: Arc<dyn Hypervisor>,
}

impl ExecutionDriver {
    pub fn new(
        config: Arc<TestbenchConfig>,
        access: Arc<dyn ImageAccess>,
        hypervisor: Arc<dyn Hypervisor>,
    ) -> Self {
        Self {
            config,
            access,
            hypervisor,
        }
    }

    /// Run `command` inside a copy of `image` with the credentials of `claim`
    pub async fn execute(
        &self,
        image: &ImageArtifact,
        claim: &ClusterClaim,
        command: &[String],
    ) -> Result<ExecutionResult> {
        let harness = Harness::new(command.to_vec())?;
        let environment = image.environment.as_str();
        let working = self.config.working_image_path(environment);

        let outcome = self
            .drive(image, claim, &harness, &working)
            .instrument(pipeline_span(environment))
            .await;

        match &outcome {
            Ok(result) => {
                if let Err(e) = remove_if_exists(&working) {
                    tracing::warn!(
                        environment = %environment,
                        working_image = %working.display(),
                        error = %e,
                        "could not remove working image"
                    );
                }
                tracing::info!(
                    environment = %environment,
                    exit_status = result.exit_status,
                    "environment finished"
                );
            }
            Err(e) => {
                if working.exists() {
                    tracing::warn!(
                        environment = %environment,
                        working_image = %working.display(),
                        error = %e,
                        "retained working image for inspection"
                    );
                }
            }
        }
        outcome
    }

    async fn drive(
        &self,
        image: &ImageArtifact,
        claim: &ClusterClaim,
        harness: &Harness,
        working: &Path,
    ) -> Result<ExecutionResult> {
        let environment = image.environment.as_str();
        let result_path = self.config.result_path(environment);

        step(environment, PipelineStep::ImageCopied, async {
            // A stale result must not outlive a new attempt
            remove_if_exists(&result_path)?;
            tokio::fs::copy(&image.path, working)
                .await
                .map_err(|e| Error::file_system(working, "copy image", e))?;
            Ok(())
        })
        .await?;

        step(
            environment,
            PipelineStep::CredentialsInjected,
            self.with_mount(working, |root| {
                harness::install_credentials(root, &claim.credentials)
            }),
        )
        .await?;

        step(
            environment,
            PipelineStep::CommandInjected,
            self.with_mount(working, |root| harness.stage(root)),
        )
        .await?;

        step(
            environment,
            PipelineStep::Booted,
            self.hypervisor.boot(working),
        )
        .await?;

        step(environment, PipelineStep::ResultExtracted, async {
            let stream = self.with_mount(working, harness::read_result).await?;
            let result = ExecutionResult::from_stream(environment, &result_path, stream)?;
            write_if_changed(&result_path, result.stream.as_bytes())?;
            Ok(result)
        })
        .await
    }

    /// Mount `image`, run `f` on its root and unmount again, even if `f` failed
    async fn with_mount<T>(&self, image: &Path, f: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        let mount = self.access.mount(image).await?;
        let outcome = f(mount.root());
        let unmounted = self.access.unmount(mount).await;
        match (outcome, unmounted) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unmount)) => {
                tracing::warn!(image = %image.display(), error = %unmount, "unmount failed");
                Err(e)
            }
        }
    }
}

async fn step<T>(
    environment: &str,
    step: PipelineStep,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    let started = Instant::now();
    match work.await {
        Ok(value) => {
            step_completed(environment, step.as_str(), started.elapsed().as_millis());
            Ok(value)
        }
        Err(e) => {
            tracing::error!(environment = %environment, step = %step, error = %e, "step failed");
            Err(Error::pipeline_step(environment, step, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_access::MountPoint;
    use async_trait::async_trait;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use testbench_core::{IMAGE_CREDENTIAL_PATH, IMAGE_RESULT_PATH, IMAGE_RUN_SCRIPT_PATH};

    /// Mounts an image at `<image>.root` and "boots" by running nothing: it
    /// answers with a canned result stream when the run script is present.
    struct FakeMachine {
        stream: String,
        fail_boot: bool,
        // Replace the working image with a directory so it cannot be removed
        pin_working_image: bool,
        mounted: Mutex<usize>,
    }

    impl FakeMachine {
        fn new(stream: &str) -> Self {
            Self {
                stream: stream.to_string(),
                fail_boot: false,
                pin_working_image: false,
                mounted: Mutex::new(0),
            }
        }

        fn root(image: &Path) -> PathBuf {
            PathBuf::from(format!("{}.root", image.display()))
        }
    }

    #[async_trait]
    impl ImageAccess for FakeMachine {
        async fn mount(&self, image: &Path) -> Result<MountPoint> {
            let root = Self::root(image);
            fs::create_dir_all(&root).unwrap();
            *self.mounted.lock().unwrap() += 1;
            Ok(MountPoint::new(image, root))
        }

        async fn unmount(&self, _mount: MountPoint) -> Result<()> {
            *self.mounted.lock().unwrap() -= 1;
            Ok(())
        }
    }

    #[async_trait]
    impl Hypervisor for FakeMachine {
        async fn boot(&self, image: &Path) -> Result<()> {
            if self.fail_boot {
                return Err(Error::command_execution("qemu-kvm", vec![], "no kvm", Some(1)));
            }
            if self.pin_working_image {
                fs::remove_file(image).unwrap();
                fs::create_dir_all(image.join("pinned")).unwrap();
            }
            let root = Self::root(image);
            if fs::remove_file(root.join(IMAGE_RUN_SCRIPT_PATH)).is_ok() {
                let result = root.join(IMAGE_RESULT_PATH);
                fs::create_dir_all(result.parent().unwrap()).unwrap();
                fs::write(result, &self.stream).unwrap();
            }
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        config: Arc<TestbenchConfig>,
        image: ImageArtifact,
        claim: ClusterClaim,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = TestbenchConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let image_path = config.image_path("alpha");
        fs::write(&image_path, "image").unwrap();
        let credentials = config.credential_path("alpha");
        fs::write(&credentials, "kubeconfig").unwrap();
        Fixture {
            image: ImageArtifact {
                environment: "alpha".to_string(),
                path: image_path,
                rebuilt: true,
            },
            claim: ClusterClaim {
                environment: "alpha".to_string(),
                id: "alpha-ci-1".to_string(),
                credentials,
            },
            config: Arc::new(config),
            _dir: dir,
        }
    }

    fn driver(fixture: &Fixture, machine: Arc<FakeMachine>) -> ExecutionDriver {
        ExecutionDriver::new(Arc::clone(&fixture.config), machine.clone(), machine)
    }

    fn command() -> Vec<String> {
        vec!["run-tests".to_string()]
    }

    #[tokio::test]
    async fn test_successful_pipeline() {
        let fixture = fixture();
        let machine = Arc::new(FakeMachine::new("1..1\nok 1 - pods\n# exit: 0\n"));
        let result = driver(&fixture, Arc::clone(&machine))
            .execute(&fixture.image, &fixture.claim, &command())
            .await
            .unwrap();

        assert_eq!(result.exit_status, 0);
        assert_eq!(result.environment, "alpha");
        let stored = fs::read_to_string(fixture.config.result_path("alpha")).unwrap();
        assert_eq!(stored, result.stream);

        let working = fixture.config.working_image_path("alpha");
        assert!(!working.exists());
        let root = FakeMachine::root(&working);
        assert_eq!(
            fs::read_to_string(root.join(IMAGE_CREDENTIAL_PATH)).unwrap(),
            "kubeconfig"
        );
        assert_eq!(*machine.mounted.lock().unwrap(), 0);
        // The cached image is untouched
        assert_eq!(fs::read_to_string(&fixture.image.path).unwrap(), "image");
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_result() {
        let fixture = fixture();
        let machine = Arc::new(FakeMachine {
            pin_working_image: true,
            ..FakeMachine::new("1..1\nok 1\n# exit: 4\n")
        });
        let result = driver(&fixture, machine)
            .execute(&fixture.image, &fixture.claim, &command())
            .await
            .unwrap();

        assert_eq!(result.exit_status, 4);
        assert!(fixture.config.working_image_path("alpha").is_dir());
        assert!(fixture.config.result_path("alpha").exists());
    }

    #[tokio::test]
    async fn test_boot_failure_retains_working_image() {
        let fixture = fixture();
        let machine = Arc::new(FakeMachine {
            fail_boot: true,
            ..FakeMachine::new("")
        });
        let err = driver(&fixture, machine)
            .execute(&fixture.image, &fixture.claim, &command())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::PipelineStep {
                step: PipelineStep::Booted,
                ..
            }
        ));
        assert!(fixture.config.working_image_path("alpha").exists());
        assert!(!fixture.config.result_path("alpha").exists());
    }

    #[tokio::test]
    async fn test_missing_trailer_fails_extraction() {
        let fixture = fixture();
        fs::write(fixture.config.result_path("alpha"), "stale\n# exit: 0\n").unwrap();
        let machine = Arc::new(FakeMachine::new("1..1\nok 1\n"));
        let err = driver(&fixture, machine)
            .execute(&fixture.image, &fixture.claim, &command())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::PipelineStep {
                step: PipelineStep::ResultExtracted,
                ..
            }
        ));
        assert!(!fixture.config.result_path("alpha").exists());
        assert!(fixture.config.working_image_path("alpha").exists());
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_injection() {
        let fixture = fixture();
        fs::remove_file(&fixture.claim.credentials).unwrap();
        let machine = Arc::new(FakeMachine::new(""));
        let err = driver(&fixture, Arc::clone(&machine))
            .execute(&fixture.image, &fixture.claim, &command())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::PipelineStep {
                step: PipelineStep::CredentialsInjected,
                ..
            }
        ));
        assert_eq!(*machine.mounted.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_command() {
        let fixture = fixture();
        let machine = Arc::new(FakeMachine::new(""));
        let err = driver(&fixture, machine)
            .execute(&fixture.image, &fixture.claim, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCommand));
    }
}
