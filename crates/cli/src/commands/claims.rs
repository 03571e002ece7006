use testbench_core::Result;
use testbench_task::Orchestrator;

pub async fn execute(orchestrator: &Orchestrator) -> Result<i32> {
    let released = orchestrator.delete_claims().await?;
    if released.is_empty() {
        println!("no claims to release");
    }
    for environment in released {
        println!("released claim of {environment}");
    }
    Ok(0)
}
