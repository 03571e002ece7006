use std::fmt::Write as _;
use std::path::Path;
use testbench_config::{discover, EnvironmentSpec, ExtraOverlay, TestbenchConfig};
use testbench_core::Result;

/// Print every selected environment with its companions and settings
pub fn execute(config: &TestbenchConfig, environments: &[String]) -> Result<i32> {
    let set = discover(&config.descriptor_dir)?.select(environments)?;
    let mut out = String::new();
    for (i, spec) in set.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        render(&mut out, spec)?;
    }
    print!("{out}");
    Ok(0)
}

fn render(out: &mut String, spec: &EnvironmentSpec) -> Result<()> {
    let descriptor = spec.parse_descriptor()?;
    let show = |path: Option<&Path>| {
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    let extra = match &spec.extra {
        Some(ExtraOverlay::Directory(path)) => format!("{} (directory)", path.display()),
        Some(ExtraOverlay::Archive(path)) => format!("{} (archive)", path.display()),
        None => "-".to_string(),
    };

    let _ = writeln!(out, "{}", spec.name);
    let _ = writeln!(out, "  descriptor: {}", spec.descriptor.display());
    let _ = writeln!(out, "  postinst:   {}", show(spec.postinst.as_deref()));
    let _ = writeln!(out, "  extra:      {extra}");
    for (section, keys) in descriptor.sections() {
        let _ = writeln!(out, "  [{section}]");
        for (key, value) in keys {
            let _ = writeln!(out, "    {key}={value}");
        }
    }
    Ok(())
}
