//! Deferred completion of dispatched requests.
//!
//! A servant that cannot produce its result before `dispatch` returns calls
//! [`Request::defer`](crate::incoming::Request::defer), returns the [`Deferred`] marker and keeps
//! the [`AsyncResponse`] token. The dispatch engine then waits for the token in the background and
//! finishes the reply once it is completed.
//!
//! The token is one-shot: completing it consumes it. Dropping it without completing the request
//! finishes the dispatch with an unknown-exception reply, so the caller is never left waiting and
//! any locator cookie is still released.
//!
//! ```
//! # use servant::incoming::Request;
//! # use servant::servant::DispatchOutcome;
//! fn slow_operation(request: &mut Request) -> DispatchOutcome {
//!     let (deferred, mut response) = request.defer();
//!     tokio::spawn(async move {
//!         response.output().write_i32(42);
//!         response.ok();
//!     });
//!     deferred.into()
//! }
//! ```

use std::fmt;

use tokio::sync::oneshot;

use crate::{error::DispatchError, protocol::DispatchStatus, stream::OutputStream};

/// The value an [`AsyncResponse`] hands back to the dispatch engine.
pub(crate) type Completion = Result<(DispatchStatus, OutputStream), DispatchError>;

/// A marker indicating that the request will be completed through an [`AsyncResponse`].
///
/// Returned by [`Request::defer`](crate::incoming::Request::defer) and handed back to the engine
/// as [`DispatchOutcome::Deferred`](crate::servant::DispatchOutcome::Deferred).
#[must_use = "the deferred marker should be returned by the servant"]
pub struct Deferred {
    rx: oneshot::Receiver<Completion>,
}

impl Deferred {
    pub(crate) fn into_receiver(self) -> oneshot::Receiver<Completion> {
        self.rx
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}

/// A one-shot token used to finish a deferred request.
#[must_use = "the caller expects the request to be completed"]
pub struct AsyncResponse {
    tx: oneshot::Sender<Completion>,
    output: OutputStream,
}

impl AsyncResponse {
    pub(crate) fn new(output: OutputStream) -> (Deferred, Self) {
        let (tx, rx) = oneshot::channel();
        (Deferred { rx }, AsyncResponse { tx, output })
    }

    /// The stream the operation's results are written to.
    ///
    /// Its contents become the reply payload when the request completes with
    /// [`DispatchStatus::Ok`] or [`DispatchStatus::UserException`].
    pub fn output(&mut self) -> &mut OutputStream {
        &mut self.output
    }

    /// Completes the request successfully.
    pub fn ok(self) {
        self.complete(DispatchStatus::Ok)
    }

    /// Completes the request with a declared user exception written to [`output`](Self::output).
    pub fn user_exception(self) {
        self.complete(DispatchStatus::UserException)
    }

    /// Completes the request with the given status.
    pub fn complete(self, status: DispatchStatus) {
        let _ = self.tx.send(Ok((status, self.output)));
    }

    /// Fails the request, exactly as if the servant had returned `err` from dispatch.
    pub fn fail(self, err: DispatchError) {
        let _ = self.tx.send(Err(err));
    }

    /// Returns `true` if the dispatch engine is no longer waiting for this response.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for AsyncResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResponse")
            .field("written", &self.output.len())
            .finish_non_exhaustive()
    }
}
