//! `runchat health`

use anyhow::Context as _;

use super::Context;

pub async fn execute(context: &Context) -> anyhow::Result<()> {
    let service = context.client.clone().into_service();
    let health = service.health_check().await.context("health check failed")?;
    println!("{health}");

    if !health.is_available() {
        anyhow::bail!("Runchat API is not reachable with this configuration");
    }

    Ok(())
}
