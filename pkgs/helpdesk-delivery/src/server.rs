use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::routes::router;
use crate::service::SupportService;

/// Serve the helpdesk API until `shutdown` resolves
///
/// Open delivery channels are closed once shutdown begins so that graceful
/// shutdown does not wait on long-lived streams.
pub async fn serve<F>(
    listener: TcpListener,
    service: Arc<SupportService>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = Arc::clone(service.registry());
    let app = router(service);

    info!("Helpdesk API listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutting down, closing delivery channels");
            registry.close_all();
        })
        .await
}
