use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::trace;

use super::Adapter;
use crate::{
    connection::Connection,
    error::{AdapterError, CollocatedError},
    incoming::Incoming,
    protocol::{ReplyFrame, RequestFrame},
    stream::OutputStream,
};

/// Keeps a direct dispatch counted against deactivation until dropped.
///
/// Created by [`Adapter::direct_dispatch`].
#[must_use = "the dispatch stops being counted as soon as the guard is dropped"]
pub struct DirectDispatch {
    adapter: Adapter,
}

impl Drop for DirectDispatch {
    fn drop(&mut self) {
        self.adapter.dec_direct_count();
    }
}

impl fmt::Debug for DirectDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectDispatch")
            .field("adapter", &self.adapter.inner.name)
            .finish()
    }
}

impl Adapter {
    /// Counts a dispatch that bypasses the adapter's connection factories.
    ///
    /// [`wait_for_deactivate`](Self::wait_for_deactivate) does not complete while the count is
    /// non-zero. Fails once deactivation has started.
    pub fn inc_direct_count(&self) -> Result<(), AdapterError> {
        let mut shared = self.lock();
        self.check_for_deactivation(&shared)?;
        shared.direct_count += 1;
        self.publish(&shared);
        Ok(())
    }

    /// Ends a dispatch counted by [`inc_direct_count`](Self::inc_direct_count).
    pub fn dec_direct_count(&self) {
        let mut shared = self.lock();
        debug_assert!(shared.direct_count > 0, "unbalanced direct count");
        shared.direct_count = shared.direct_count.saturating_sub(1);
        self.publish(&shared);
    }

    /// Counts a direct dispatch for as long as the returned guard lives.
    pub fn direct_dispatch(&self) -> Result<DirectDispatch, AdapterError> {
        self.inc_direct_count()?;
        Ok(DirectDispatch {
            adapter: self.clone(),
        })
    }

    /// Dispatches a request to this adapter in-process.
    ///
    /// The request goes through the full dispatch engine, including servant locators and failure
    /// classification, and is counted as a direct dispatch until its reply is produced. Returns
    /// `None` for one-way requests.
    pub async fn invoke_collocated(
        &self,
        frame: &RequestFrame,
    ) -> Result<Option<ReplyFrame>, CollocatedError> {
        let _direct = self.direct_dispatch()?;
        trace!(
            adapter = %self.inner.name,
            identity = %frame.id,
            operation = %frame.operation,
            "collocated invocation"
        );

        let (connection, reply) = CollocatedConnection::new();
        Incoming::new(
            Some(self.clone()),
            connection,
            frame.request_id,
            frame.response_expected(),
            false,
        )
        .invoke(frame.encode_body())
        .await?;

        match reply.await {
            Ok(Some(bytes)) => Ok(Some(ReplyFrame::decode(bytes)?)),
            Ok(None) => Ok(None),
            Err(_) => Err(CollocatedError::ConnectionLost),
        }
    }
}

/// An in-memory connection that hands the single reply of a collocated request to its caller.
struct CollocatedConnection {
    tx: Mutex<Option<oneshot::Sender<Option<Bytes>>>>,
}

impl CollocatedConnection {
    fn new() -> (Arc<Self>, oneshot::Receiver<Option<Bytes>>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(CollocatedConnection {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    fn send(&self, reply: Option<Bytes>) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(reply);
        }
    }
}

impl Connection for CollocatedConnection {
    fn send_response(&self, reply: OutputStream, _compress: bool) {
        self.send(Some(reply.freeze()));
    }

    fn send_no_response(&self) {
        self.send(None);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::AdapterConfig;

    #[tokio::test]
    async fn deactivation_waits_for_direct_dispatches() {
        let adapter = Adapter::new("test", AdapterConfig::default());
        let guard = adapter.direct_dispatch().unwrap();
        adapter.deactivate();
        assert!(adapter.direct_dispatch().is_err());

        let waiter = tokio::spawn({
            let adapter = adapter.clone();
            async move { adapter.wait_for_deactivate().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(adapter.is_deactivated());
    }

    #[tokio::test]
    async fn collocated_invocations_fail_after_deactivation() {
        let adapter = Adapter::new("test", AdapterConfig::default());
        adapter.deactivate();
        let frame = RequestFrame::new(1, crate::identity::Identity::named("obj"), "ping");
        assert!(matches!(
            adapter.invoke_collocated(&frame).await,
            Err(CollocatedError::Adapter(AdapterError::Deactivated { .. }))
        ));
    }
}
