use clap::Subcommand;
use testbench_config::ConfigOverrides;

pub mod claims;
pub mod prepare;
pub mod report;
pub mod run;
pub mod summary;

#[derive(Subcommand)]
pub enum Commands {
    /// Build, lease and run a command in every environment, then report
    Run {
        /// Maximum number of concurrent build graph nodes
        #[arg(short, long, value_name = "N")]
        jobs: Option<usize>,

        /// Keep cluster leases after the run instead of releasing them
        #[arg(long)]
        keep_claims: bool,

        /// Only run these environments (can be specified multiple times)
        #[arg(short = 'e', long = "env", value_name = "ENV")]
        environments: Vec<String>,

        /// Extra argument for the hypervisor (can be specified multiple times)
        #[arg(long = "qemu-arg", value_name = "ARG", allow_hyphen_values = true)]
        qemu_args: Vec<String>,

        /// Test command to run inside each environment
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Build or refresh environment images without running anything
    Prepare {
        /// Maximum number of concurrent image builds
        #[arg(short, long, value_name = "N")]
        jobs: Option<usize>,

        /// Only prepare these environments
        #[arg(short = 'e', long = "env", value_name = "ENV")]
        environments: Vec<String>,
    },

    /// Release every cluster lease held by this output directory
    DeleteClaims,

    /// Re-aggregate stored results into report.json
    Report {
        /// Only report these environments
        #[arg(short = 'e', long = "env", value_name = "ENV")]
        environments: Vec<String>,
    },

    /// Show discovered environments and their descriptor settings
    Summary {
        /// Only show these environments
        #[arg(short = 'e', long = "env", value_name = "ENV")]
        environments: Vec<String>,
    },
}

impl Commands {
    /// Configuration carried by subcommand flags
    pub fn overrides(&self) -> ConfigOverrides {
        match self {
            Commands::Run {
                jobs,
                keep_claims,
                qemu_args,
                ..
            } => ConfigOverrides {
                jobs: *jobs,
                keep_claims: *keep_claims,
                hypervisor_args: qemu_args.clone(),
                ..Default::default()
            },
            Commands::Prepare { jobs, .. } => ConfigOverrides {
                jobs: *jobs,
                ..Default::default()
            },
            _ => ConfigOverrides::default(),
        }
    }
}
