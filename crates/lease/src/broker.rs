use async_trait::async_trait;
use std::path::PathBuf;
use testbench_config::TestbenchConfig;
use testbench_core::Result;
use testbench_utils::ToolCommand;

/// Remote side of a cluster lease
#[async_trait]
pub trait LeaseBroker: Send + Sync {
    /// Delete the claim `claim_id`. Deleting an unknown claim is not an error
    /// for callers that treat it as best effort.
    async fn delete(&self, claim_id: &str) -> Result<()>;

    /// Create a claim named `claim_id` in the configured pool
    async fn create(&self, claim_id: &str) -> Result<()>;

    /// Fetch the credential file of an existing claim
    async fn credentials(&self, claim_id: &str) -> Result<Vec<u8>>;
}

/// Drives the broker command line tool.
///
/// `BROKER delete ID`, `BROKER create --pool POOL ID` and
/// `BROKER kubeconfig ID` (credentials on stdout). `HOME` is set from the
/// configuration so the tool finds its stored login.
#[derive(Debug, Clone)]
pub struct ProcessLeaseBroker {
    program: String,
    pool: String,
    home: PathBuf,
}

impl ProcessLeaseBroker {
    pub fn new(program: impl Into<String>, pool: impl Into<String>, home: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            pool: pool.into(),
            home: home.into(),
        }
    }

    pub fn from_config(config: &TestbenchConfig) -> Self {
        Self::new(&config.lease_broker, &config.lease_pool, &config.home_dir)
    }

    fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.program).env("HOME", self.home.to_string_lossy())
    }

    pub fn delete_command(&self, claim_id: &str) -> ToolCommand {
        self.command().args(["delete", claim_id])
    }

    pub fn create_command(&self, claim_id: &str) -> ToolCommand {
        self.command()
            .args(["create", "--pool", self.pool.as_str(), claim_id])
    }

    pub fn credentials_command(&self, claim_id: &str) -> ToolCommand {
        self.command().args(["kubeconfig", claim_id])
    }
}

#[async_trait]
impl LeaseBroker for ProcessLeaseBroker {
    async fn delete(&self, claim_id: &str) -> Result<()> {
        self.delete_command(claim_id).output().await.map(|_| ())
    }

    async fn create(&self, claim_id: &str) -> Result<()> {
        self.create_command(claim_id).output().await.map(|_| ())
    }

    async fn credentials(&self, claim_id: &str) -> Result<Vec<u8>> {
        Ok(self.credentials_command(claim_id).output().await?.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        let broker = ProcessLeaseBroker::new("knaut", "testbench", "/home/ci");
        assert_eq!(
            broker.create_command("alpha-ci-1").get_args(),
            ["create", "--pool", "testbench", "alpha-ci-1"]
        );
        assert_eq!(broker.delete_command("alpha-ci-1").get_args(), ["delete", "alpha-ci-1"]);
        assert_eq!(
            broker.credentials_command("alpha-ci-1").display(),
            "knaut kubeconfig alpha-ci-1"
        );
    }

    #[tokio::test]
    async fn test_credentials_come_from_stdout() {
        let broker = ProcessLeaseBroker::new("echo", "testbench", "/tmp");
        let creds = broker.credentials("alpha-ci-1").await.unwrap();
        assert_eq!(String::from_utf8_lossy(&creds), "kubeconfig alpha-ci-1\n");
    }

    #[tokio::test]
    async fn test_broker_failure_is_reported() {
        let broker = ProcessLeaseBroker::new("false", "testbench", "/tmp");
        assert!(broker.create("alpha-ci-1").await.is_err());
    }
}
