//! Booting working images to completion
//!
//! The instance is expected to power itself off once the harness has written
//! its results. No timeout is applied here.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testbench_config::TestbenchConfig;
use testbench_core::{Error, Result};
use testbench_utils::ToolCommand;

#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Boot `image` and return once the machine has halted
    async fn boot(&self, image: &Path) -> Result<()>;
}

const X86_64_FIRMWARE: &[&str] = &[
    "/usr/share/ovmf/ovmf_code_x64.bin",
    "/usr/share/ovmf/x64/OVMF_CODE.fd",
];
const I386_FIRMWARE: &[&str] = &[
    "/usr/share/ovmf/ovmf_code_ia32.bin",
    "/usr/share/edk2/ovmf-ia32/OVMF_CODE.fd",
];
const GENERIC_FIRMWARE: &[&str] = &[
    "/usr/share/edk2/ovmf/OVMF_CODE.fd",
    "/usr/share/qemu/OVMF_CODE.fd",
    "/usr/share/OVMF/OVMF_CODE.fd",
];

/// Host-arch specific binary and firmware candidates
fn arch_candidates(arch: &str) -> (Option<&'static str>, &'static [&'static str]) {
    match arch {
        "x86_64" => (Some("qemu-system-x86_64"), X86_64_FIRMWARE),
        "x86" => (Some("qemu-system-i386"), I386_FIRMWARE),
        _ => (None, &[]),
    }
}

/// Pick the QEMU invocation: the program and the arguments it always needs.
/// `find` resolves a program name to a path when it is installed.
pub fn discover_binary(
    explicit: Option<&str>,
    arch: &str,
    find: impl Fn(&str) -> Option<PathBuf>,
) -> Result<(PathBuf, Vec<String>)> {
    if let Some(program) = explicit {
        let path = find(program).ok_or_else(|| {
            Error::configuration(format!("configured hypervisor '{program}' not found"))
        })?;
        return Ok((path, Vec::new()));
    }

    let kvm = || vec!["-machine".to_string(), "accel=kvm".to_string()];
    let mut candidates: Vec<(&str, Vec<String>)> = Vec::new();
    if let (Some(binary), _) = arch_candidates(arch) {
        candidates.push((binary, kvm()));
    }
    candidates.push(("qemu", kvm()));
    candidates.push(("qemu-kvm", Vec::new()));

    candidates
        .into_iter()
        .find_map(|(name, args)| find(name).map(|path| (path, args)))
        .ok_or_else(|| Error::configuration("couldn't find a QEMU/KVM binary"))
}

/// Locate UEFI firmware, arch specific locations first
pub fn discover_firmware(arch: &str, exists: impl Fn(&Path) -> bool) -> Result<PathBuf> {
    let (_, specific) = arch_candidates(arch);
    specific
        .iter()
        .chain(GENERIC_FIRMWARE)
        .map(|path| PathBuf::from(*path))
        .find(|path| exists(path))
        .ok_or_else(|| Error::configuration("couldn't find OVMF UEFI firmware"))
}

/// QEMU with OVMF firmware, discovered on the host
pub struct Qemu {
    config: Arc<TestbenchConfig>,
}

impl Qemu {
    pub fn new(config: Arc<TestbenchConfig>) -> Self {
        Self { config }
    }

    /// The full boot command line for `image`
    pub fn command(&self, image: &Path) -> Result<ToolCommand> {
        let arch = std::env::consts::ARCH;
        let (program, base_args) = discover_binary(self.config.hypervisor.as_deref(), arch, |name| {
            which::which(name).ok()
        })?;
        let firmware = discover_firmware(arch, Path::exists)?;
        Ok(boot_command(
            &program,
            &base_args,
            &firmware,
            image,
            &self.config.hypervisor_args,
        ))
    }
}

fn boot_command(
    program: &Path,
    base_args: &[String],
    firmware: &Path,
    image: &Path,
    extra_args: &[String],
) -> ToolCommand {
    ToolCommand::new(program.to_string_lossy())
        .args(base_args)
        .args(["-smp", "2", "-m", "1024"])
        .arg("-drive")
        .arg(format!(
            "if=pflash,format=raw,readonly=on,file={}",
            firmware.display()
        ))
        .arg("-drive")
        .arg(format!("format=raw,file={}", image.display()))
        .arg("-nographic")
        .args(extra_args)
}

#[async_trait]
impl Hypervisor for Qemu {
    async fn boot(&self, image: &Path) -> Result<()> {
        let command = self.command(image)?;
        tracing::info!(image = %image.display(), command = %command.display(), "booting");
        command.output().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed<'a>(names: &'a [&'a str]) -> impl Fn(&str) -> Option<PathBuf> + 'a {
        move |name: &str| {
            names
                .contains(&name)
                .then(|| PathBuf::from("/usr/bin").join(name))
        }
    }

    #[test]
    fn test_prefers_arch_binary_with_kvm() {
        let (path, args) =
            discover_binary(None, "x86_64", installed(&["qemu-kvm", "qemu-system-x86_64"])).unwrap();
        assert_eq!(path, PathBuf::from("/usr/bin/qemu-system-x86_64"));
        assert_eq!(args, ["-machine", "accel=kvm"]);
    }

    #[test]
    fn test_falls_back_to_qemu_kvm() {
        let (path, args) = discover_binary(None, "aarch64", installed(&["qemu-kvm"])).unwrap();
        assert_eq!(path, PathBuf::from("/usr/bin/qemu-kvm"));
        assert!(args.is_empty());
    }

    #[test]
    fn test_explicit_binary() {
        let (path, args) = discover_binary(Some("my-qemu"), "x86_64", installed(&["my-qemu"])).unwrap();
        assert_eq!(path, PathBuf::from("/usr/bin/my-qemu"));
        assert!(args.is_empty());
        assert!(discover_binary(Some("my-qemu"), "x86_64", installed(&[])).is_err());
        assert!(discover_binary(None, "x86_64", installed(&[])).is_err());
    }

    #[test]
    fn test_firmware_order() {
        let fw = discover_firmware("x86_64", |p| {
            p == Path::new("/usr/share/qemu/OVMF_CODE.fd")
                || p == Path::new("/usr/share/ovmf/x64/OVMF_CODE.fd")
        })
        .unwrap();
        assert_eq!(fw, PathBuf::from("/usr/share/ovmf/x64/OVMF_CODE.fd"));
        assert!(discover_firmware("x86_64", |_| false).is_err());
    }

    #[test]
    fn test_boot_command() {
        let cmd = boot_command(
            Path::new("/usr/bin/qemu-kvm"),
            &[],
            Path::new("/fw/OVMF_CODE.fd"),
            Path::new("out/alpha.tap.osi"),
            &["-enable-kvm".to_string()],
        );
        assert_eq!(
            cmd.get_args(),
            [
                "-smp",
                "2",
                "-m",
                "1024",
                "-drive",
                "if=pflash,format=raw,readonly=on,file=/fw/OVMF_CODE.fd",
                "-drive",
                "format=raw,file=out/alpha.tap.osi",
                "-nographic",
                "-enable-kvm"
            ]
        );
    }
}
