use crate::commands::{self, Commands};
use std::sync::Arc;
use testbench_config::TestbenchConfig;
use testbench_core::Result;
use testbench_task::{Collaborators, Orchestrator};
use tokio::sync::watch;

impl Commands {
    /// Run the subcommand and return the process exit code
    pub async fn execute(
        self,
        config: Arc<TestbenchConfig>,
        interrupt: watch::Receiver<bool>,
    ) -> Result<i32> {
        let orchestrator =
            Orchestrator::new(Arc::clone(&config), Collaborators::from_config(&config))
                .with_interrupt(interrupt);

        match self {
            Commands::Run {
                environments,
                command,
                ..
            } => commands::run::execute(&orchestrator, &environments, &command).await,
            Commands::Prepare { environments, .. } => {
                commands::prepare::execute(&orchestrator, &environments).await
            }
            Commands::DeleteClaims => commands::claims::execute(&orchestrator).await,
            Commands::Report { environments } => {
                commands::report::execute(&orchestrator, &environments)
            }
            Commands::Summary { environments } => commands::summary::execute(&config, &environments),
        }
    }
}
