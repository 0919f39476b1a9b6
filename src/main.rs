use anyhow::Result;

use stratum::migrate::registry::MigrationRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Generated migrations are registered by downstream project binaries;
    // the stock binary starts with an empty registry.
    stratum::cli::run(MigrationRegistry::new()).await
}
