use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Waits for Ctrl-C and cancels `cancelation`. Returns early if something else cancels first.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, shutting down");
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => (),
    };
}
