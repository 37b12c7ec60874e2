use tracing_subscriber::EnvFilter;

use sketchhub_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sketchhub_server=debug")),
        )
        .init();

    let config = Config::from_env()?;
    sketchhub_server::run_server(config).await
}
