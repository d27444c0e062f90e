mod api;
mod api_error;
mod cache;
mod config;
mod scanner;
mod server;
#[cfg(test)]
mod test_utils;

use anyhow::Context;
use clap::Parser;
use std::{env, path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;

use crate::{scanner::AnnotationScanner, server::SpecServer};

#[derive(Parser, Debug)]
#[command(
    name = "spec-server",
    about = "Serves an OpenAPI document generated from source annotations"
)]
struct Args {
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Print the generated document to stdout and exit.
    #[arg(long)]
    dump: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .or_else(|| env::var(config::CONFIG_PATH_ENV).ok().map(PathBuf::from));
    let settings = config::Settings::load(config_path)?;

    let cache = settings
        .build_cache()
        .context("failed to initialise document cache")?;
    let cache_backend = cache.as_ref().map_or("none", |cache| cache.backend());
    let server_config = settings.server_config(cache)?;
    let server = Arc::new(SpecServer::new(server_config, Arc::new(AnnotationScanner)));

    if args.dump {
        let response = tokio::task::spawn_blocking({
            let server = Arc::clone(&server);
            move || server.serve()
        })
        .await??;
        println!("{}", response.body());
        return Ok(());
    }

    let app = api::router(Arc::clone(&server), &settings.docs.route);
    let listen_addr = settings.listen_addr();
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(
        address = %listen_addr,
        route = %settings.docs.route,
        targets = ?settings.docs.scan_targets,
        cache = cache_backend,
        "spec server listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
