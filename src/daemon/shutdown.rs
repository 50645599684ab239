use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Detects signals sent to the process and cancels `cancelation`. Also returns when something
/// else cancels it first.
///
/// On Windows detached processes can't detect signals sent to them, there `stop` kills the
/// process and the last flush bounds what is lost.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c");
            cancelation.cancel();
        },
        _ = terminate => {
            info!("Received terminate signal");
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => (),
    };
}
