use testbench_core::Result;
use testbench_task::Orchestrator;

/// Run `command` everywhere and print the report.
///
/// The exit code is the worst exit status any environment reported.
pub async fn execute(
    orchestrator: &Orchestrator,
    environments: &[String],
    command: &[String],
) -> Result<i32> {
    let report = orchestrator.run(environments, command).await?;
    print!("{}", report.render_text());
    println!(
        "\nreport written to {}",
        orchestrator.config().report_path().display()
    );
    Ok(report.exit_code())
}
