use {
    futures::Future,
    std::{io, pin::pin},
    tokio::signal::unix::{self, Signal, SignalKind},
};

/// Resolves on SIGTERM or SIGINT.
pub fn shutdown() -> io::Result<impl Future<Output = ()>> {
    let mut sigterm = listener(SignalKind::terminate())?;
    let mut sigint = listener(SignalKind::interrupt())?;

    Ok(async move {
        let mut sigterm = pin!(sigterm.recv());
        let mut sigint = pin!(sigint.recv());

        tokio::select! {
            _ = &mut sigterm => tracing::info!("received SIGTERM"),
            _ = &mut sigint => tracing::info!("received SIGINT"),
        }
    })
}

/// SIGHUP listener, used to reload the config.
pub(crate) fn reload() -> io::Result<Signal> {
    listener(SignalKind::hangup())
}

fn listener(kind: SignalKind) -> io::Result<Signal> {
    unix::signal(kind)
}
