//! The service-update handler interface.
//!
//! Every accepted SRP update is offered to an external handler (typically
//! an mDNS advertising proxy) before the client hears anything. The handler
//! sees the staged host, does its work, and reports the outcome back with
//! the transaction's update ID, either synchronously before `on_update`
//! returns or later through a [`CompletionSender`]. The transaction sits
//! in the outstanding queue; if the deadline passes first the update is
//! answered with SERVFAIL and dropped.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Error;
use crate::registry::Host;

/// The ID of one SRP service update transaction.
pub type ServiceUpdateId = u32;

/// The outcome a handler reports for a staged update.
pub type UpdateResult = Result<(), Error>;

/// A hook invoked once per accepted SRP update with the staged host view.
///
/// Implementations must not block: the server runs on a single cooperative
/// loop. Report the result by calling
/// [`SrpServer::handle_service_update_result`][crate::server::SrpServer::handle_service_update_result]
/// (or sending through a [`CompletionSender`]) with the same `id`.
pub trait ServiceUpdateHandler: Send + Sync {
    /// Called once for each staged update, and fire-and-forget for hosts
    /// removed by lease expiry or server shutdown.
    fn on_update(&self, id: ServiceUpdateId, host: &Host);
}

/// A shareable [`ServiceUpdateHandler`].
pub type DynServiceUpdateHandler = Arc<dyn ServiceUpdateHandler>;

/// Carries handler completions back into the server's event loop.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<(ServiceUpdateId, UpdateResult)>,
}

impl CompletionSender {
    /// Report the result of a staged update. Results for unknown or
    /// already-finished transactions are ignored by the server.
    pub fn complete(&self, id: ServiceUpdateId, result: UpdateResult) {
        // A closed channel means the server is gone; nothing to report to.
        let _ = self.tx.send((id, result));
    }
}

pub(crate) fn completion_channel() -> (
    CompletionSender,
    mpsc::UnboundedReceiver<(ServiceUpdateId, UpdateResult)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionSender { tx }, rx)
}
