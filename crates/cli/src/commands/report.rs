use testbench_core::Result;
use testbench_task::Orchestrator;

/// Rebuild the report from the result streams already on disk
pub fn execute(orchestrator: &Orchestrator, environments: &[String]) -> Result<i32> {
    let report = orchestrator.report(environments)?;
    print!("{}", report.render_text());
    Ok(report.exit_code())
}
