use anyhow::Context;
use flix_provider::{run_provider, CatalogProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let provider = CatalogProvider::from_env().context("loading demo catalog")?;
    run_provider(provider).await
}
