use testbench_core::Result;
use testbench_task::Orchestrator;

pub async fn execute(orchestrator: &Orchestrator, environments: &[String]) -> Result<i32> {
    let images = orchestrator.prepare(environments).await?;
    let width = images.iter().map(|i| i.environment.len()).max().unwrap_or_default();
    for image in &images {
        let state = if image.rebuilt { "built" } else { "up to date" };
        println!(
            "{:<width$}  {:<10}  {}",
            image.environment,
            state,
            image.path.display()
        );
    }
    Ok(0)
}
