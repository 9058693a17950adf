use {
    anyhow::Context as _,
    zonal_node::{signal, Config, Logger},
};

fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env().context("failed to parse config")?;
    let logger = Logger::init(cfg.log_format, None, cfg.log_file.clone());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        id = %cfg.node.id(),
        "starting node"
    );

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(async move {
            let shutdown = signal::shutdown().context("failed to listen for shutdown signals")?;
            zonal_node::run(cfg, shutdown).await.context("node failed")
        });

    if let Err(err) = &result {
        tracing::error!(?err, "node exited with an error");
    }

    logger.stop();

    result
}
