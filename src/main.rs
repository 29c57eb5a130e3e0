#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg: dupwatch::config::Config = dupwatch::config::load_or_create_config("config.toml")
        .await
        .expect("Unable to read or create the config.toml file");

    dupwatch::config::init_tracing(&cfg);
    tracing::info!("dupwatch booted");

    dupwatch::app::run(cfg).await?;
    Ok(())
}
