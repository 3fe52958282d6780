//! HTTP API over the pipeline.
//!
//! The server owns no pipeline logic. Upload handlers create jobs and write
//! documents; the write emits an [`ObjectCreated`](crate::trigger::ObjectCreated)
//! event and the [`TriggerDispatcher`] starts the run. Read handlers only
//! read the stores. Progress reaches browsers as server-sent events fed by a
//! [`BroadcastObserver`] on the orchestrator.

pub mod error;
pub mod grants;
pub mod handlers;
pub mod router;

use crate::orchestrator::Orchestrator;
use crate::pipeline::StageContext;
use crate::progress::BroadcastObserver;
use crate::trigger::TriggerDispatcher;
use grants::GrantStore;
use std::net::SocketAddr;
use std::sync::Arc;

pub use error::ApiError;
pub use router::api_router;

const EVENT_CAPACITY: usize = 256;
const TRIGGER_CAPACITY: usize = 64;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub trigger: TriggerDispatcher,
    pub grants: Arc<GrantStore>,
    pub events: BroadcastObserver,
}

impl AppState {
    /// Wire the orchestrator to a broadcast observer and start the trigger
    /// dispatcher. Must be called inside a tokio runtime.
    pub fn new(ctx: StageContext, grants: GrantStore) -> Self {
        let events = BroadcastObserver::new(EVENT_CAPACITY);
        let orchestrator = Orchestrator::new(ctx).with_observer(Arc::new(events.clone()));
        let (trigger, _dispatch) = TriggerDispatcher::start(orchestrator.clone(), TRIGGER_CAPACITY);
        Self {
            orchestrator,
            trigger,
            grants: Arc::new(grants),
            events,
        }
    }

    pub fn context(&self) -> &StageContext {
        self.orchestrator.context()
    }
}

/// Serve the API on `addr` until ctrl-c.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    tracing::info!(%local, "API server listening");

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("API server received shutdown signal");
    };

    axum::serve(listener, api_router(state))
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}
