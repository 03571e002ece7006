use async_trait::async_trait;
use std::path::PathBuf;
use testbench_config::{EnvironmentSpec, ExtraOverlay};
use testbench_core::Result;
use testbench_utils::ToolCommand;

/// Everything the external builder needs for one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub environment: String,
    pub descriptor: PathBuf,
    pub postinst: Option<PathBuf>,
    pub extra: Option<ExtraOverlay>,
    pub cache_dir: PathBuf,
    pub output: PathBuf,
}

impl BuildRequest {
    pub fn new(spec: &EnvironmentSpec, cache_dir: PathBuf, output: PathBuf) -> Self {
        Self {
            environment: spec.name.to_string(),
            descriptor: spec.descriptor.clone(),
            postinst: spec.postinst.clone(),
            extra: spec.extra.clone(),
            cache_dir,
            output,
        }
    }
}

/// Produces a bootable image from a descriptor
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> Result<()>;
}

/// Runs the configured builder binary
#[derive(Debug, Clone)]
pub struct ProcessImageBuilder {
    program: String,
}

impl ProcessImageBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The builder command line for `request`. The force flag is always
    /// passed; whether to build at all was already decided by the caller.
    pub fn command(&self, request: &BuildRequest) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.program)
            .arg("--default")
            .path_arg(&request.descriptor);
        if let Some(postinst) = &request.postinst {
            cmd = cmd.arg("--postinst-script").path_arg(postinst);
        }
        if let Some(extra) = &request.extra {
            cmd = cmd.arg("--extra-tree").path_arg(extra.path());
        }
        cmd.arg("--cache")
            .path_arg(&request.cache_dir)
            .arg("--output")
            .path_arg(&request.output)
            .arg("--force")
            .arg("build")
    }
}

#[async_trait]
impl ImageBuilder for ProcessImageBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<()> {
        self.command(request).status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn request(postinst: bool, extra: Option<ExtraOverlay>) -> BuildRequest {
        BuildRequest {
            environment: "alpha".to_string(),
            descriptor: PathBuf::from("d/alpha.mkosi"),
            postinst: postinst.then(|| PathBuf::from("d/alpha.mkosi.postinst")),
            extra,
            cache_dir: PathBuf::from("out/cache"),
            output: PathBuf::from("out/alpha.osi"),
        }
    }

    #[test]
    fn test_minimal_command_line() {
        let cmd = ProcessImageBuilder::new("mkosi").command(&request(false, None));
        assert_eq!(cmd.program(), "mkosi");
        assert_eq!(
            cmd.get_args(),
            [
                "--default",
                "d/alpha.mkosi",
                "--cache",
                "out/cache",
                "--output",
                "out/alpha.osi",
                "--force",
                "build"
            ]
        );
    }

    #[test]
    fn test_companions_are_wired() {
        let extra = ExtraOverlay::Archive(PathBuf::from("d/alpha.mkosi.extra.tar"));
        let cmd = ProcessImageBuilder::new("mkosi").command(&request(true, Some(extra)));
        let args = cmd.get_args();
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("--postinst-script") + 1], "d/alpha.mkosi.postinst");
        assert_eq!(
            Path::new(&args[pos("--extra-tree") + 1]),
            Path::new("d/alpha.mkosi.extra.tar")
        );
    }
}
