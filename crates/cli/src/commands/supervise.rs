//! `switchyard supervise`: audit promises made in earlier conversations.

use tracing::info;

use crate::runtime::{Runtime, load_config};

pub async fn run(once: bool) -> anyhow::Result<()> {
    let runtime = Runtime::build(load_config()?).await?;

    if once {
        let report = runtime.supervisor.tick().await?;
        println!("  Checked:   {}", report.checked);
        println!("  Resolved:  {}", report.resolved);
        println!("  Flagged:   {}", report.flagged);
        println!("  Failed:    {}", report.failed);
        println!("  Expired:   {}", report.expired);
        return Ok(());
    }

    if runtime.config.store.backend == "memory" {
        eprintln!("  Note: the memory store starts empty, so there is nothing to supervise");
        eprintln!("  until this process records commitments. Use the sqlite store to audit");
        eprintln!("  conversations from other processes.");
    }

    tokio::select! {
        _ = runtime.supervisor.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Supervisor stopped");
        }
    }
    Ok(())
}
