//! The dispatch engine.
//!
//! One [`Incoming`] is created per inbound request. [`Incoming::invoke`] decodes the request
//! header, resolves a servant through the adapter's registry and servant locators, dispatches the
//! operation, and hands exactly one encoded reply (or a no-response signal for one-way requests)
//! to the [`Connection`] the request arrived on.
//!
//! Servant failures never escape `invoke`. They are classified into a [`DispatchStatus`] and
//! encoded into the reply, so the caller always receives a well-formed answer. Only failures to
//! decode the request header are returned, since they leave nothing meaningful to reply to.

use std::{fmt, mem, panic::AssertUnwindSafe, sync::Arc};

use bytes::Bytes;
use futures::FutureExt;
use tracing::{error, warn};

use crate::{
    adapter::Adapter,
    config::DispatchConfig,
    connection::Connection,
    current::Current,
    error::{DispatchError, StreamError},
    identity::Identity,
    locator::{Cookie, ServantLocator},
    protocol::{finish_message, write_reply_header, DispatchStatus, OperationMode, REPLY_STATUS_POS},
    reply::{AsyncResponse, Deferred},
    servant::{find_facet_path, DispatchOutcome, Servant},
    stream::{InputStream, OutputStream},
};

/// The servant-facing view of a request being dispatched.
pub struct Request {
    current: Current,
    input: InputStream,
    output: OutputStream,
    response: bool,
}

impl Request {
    /// Information about the request.
    pub fn current(&self) -> &Current {
        &self.current
    }

    /// The encoded input parameters.
    pub fn input(&mut self) -> &mut InputStream {
        &mut self.input
    }

    /// The stream results are written to.
    ///
    /// This holds only the reply payload. When dispatch completes with [`DispatchStatus::Ok`] or
    /// [`DispatchStatus::UserException`] the engine wraps it in the reply encapsulation. Leaving
    /// an encapsulation open here fails the request. For one-way requests the contents are
    /// discarded.
    pub fn output(&mut self) -> &mut OutputStream {
        &mut self.output
    }

    /// Returns `true` if the caller is waiting for a reply.
    pub fn response_expected(&self) -> bool {
        self.response
    }

    /// Hands completion of this request to an [`AsyncResponse`] token.
    ///
    /// The returned [`Deferred`] marker must be returned from
    /// [`Servant::dispatch`](crate::servant::Servant::dispatch). Input parameters should be read
    /// before deferring, since the input stream is closed once dispatch returns.
    ///
    /// Anything already written to [`output`](Self::output) moves to the token, ahead of what is
    /// written through [`AsyncResponse::output`].
    pub fn defer(&mut self) -> (Deferred, AsyncResponse) {
        AsyncResponse::new(mem::take(&mut self.output))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("current", &self.current)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

struct LocatedServant {
    locator: Arc<dyn ServantLocator>,
    servant: Arc<dyn Servant>,
    cookie: Cookie,
}

/// Dispatches a single inbound request.
pub struct Incoming {
    connection: Arc<dyn Connection>,
    compress: bool,
    config: DispatchConfig,
    reply: OutputStream,
    request: Request,
    located: Option<LocatedServant>,
}

impl Incoming {
    /// Creates an engine for a request that arrived on `connection`.
    ///
    /// `adapter` is the adapter the connection belongs to, if any. Without an adapter every
    /// request resolves to [`DispatchStatus::ObjectNotExist`]. When `response` is `true` a reply to
    /// `request_id` is sent once dispatch finishes.
    pub fn new(
        adapter: Option<Adapter>,
        connection: Arc<dyn Connection>,
        request_id: i32,
        response: bool,
        compress: bool,
    ) -> Self {
        let config = adapter
            .as_ref()
            .map(Adapter::dispatch_config)
            .unwrap_or_default();
        let mut reply = OutputStream::new();
        if response {
            write_reply_header(&mut reply, request_id);
        }
        Incoming {
            connection,
            compress,
            config,
            reply,
            request: Request {
                current: Current {
                    adapter,
                    ..Current::default()
                },
                input: InputStream::default(),
                output: OutputStream::new(),
                response,
            },
            located: None,
        }
    }

    /// Overrides the dispatch configuration taken from the adapter.
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Decodes and dispatches the request body that follows the request id.
    ///
    /// Returns an error only if the request header cannot be decoded, in which case no reply is
    /// sent and the connection should be torn down. A deferred request returns as soon as the
    /// servant has deferred it; its reply is sent from a background task once completed.
    pub async fn invoke(mut self, body: Bytes) -> Result<(), StreamError> {
        self.read_header(body)?;

        let outcome = AssertUnwindSafe(self.resolve_and_dispatch())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(DispatchError::from_panic(payload)));
        match outcome {
            Ok(DispatchOutcome::Completed(status)) => {
                self.complete(status);
                self.finish().await;
            }
            Ok(DispatchOutcome::Deferred(deferred)) => {
                tokio::spawn(self.finish_deferred(deferred));
            }
            Err(err) => {
                self.fail(err);
                self.finish().await;
            }
        }

        Ok(())
    }

    fn read_header(&mut self, body: Bytes) -> Result<(), StreamError> {
        let input = &mut self.request.input;
        let current = &mut self.request.current;
        *input = InputStream::new(body);
        current.id = Identity::read(input)?;
        current.facet = input.read_string_seq()?;
        current.operation = input.read_string()?;
        current.mode = OperationMode::try_from(input.read_byte()?)?;
        let len = input.read_size()?;
        for _ in 0..len {
            let key = input.read_string()?;
            let value = input.read_string()?;
            current.ctx.insert(key, value);
        }
        input.start_read_encaps()?;
        Ok(())
    }

    async fn resolve_and_dispatch(&mut self) -> Result<DispatchOutcome, DispatchError> {
        let servant = self
            .resolve()
            .await?
            .ok_or_else(DispatchError::object_not_exist)?;
        let servant = if self.request.current.facet.is_empty() {
            servant
        } else {
            find_facet_path(&servant, &self.request.current.facet)
                .ok_or_else(DispatchError::facet_not_exist)?
        };
        servant.dispatch(&mut self.request).await
    }

    /// Registry first, then the locator for the identity's category, then the default locator.
    async fn resolve(&mut self) -> Result<Option<Arc<dyn Servant>>, DispatchError> {
        let Some(adapter) = self.request.current.adapter.clone() else {
            return Ok(None);
        };
        if let Some(servant) = adapter.identity_to_servant(&self.request.current.id) {
            return Ok(Some(servant));
        }

        let category = &self.request.current.id.category;
        let locators = (!category.is_empty())
            .then(|| adapter.find_servant_locator(category))
            .flatten()
            .into_iter()
            .chain(adapter.find_servant_locator(""));
        for locator in locators {
            if let Some((servant, cookie)) = locator.locate(&self.request.current).await? {
                self.located = Some(LocatedServant {
                    locator,
                    servant: Arc::clone(&servant),
                    cookie,
                });
                return Ok(Some(servant));
            }
        }

        Ok(None)
    }

    fn complete(&mut self, status: DispatchStatus) {
        if status.is_unknown() {
            return self.fail(DispatchError::local(format!(
                "servant completed with reserved status {status:?}"
            )));
        }
        if !self.request.response {
            return;
        }

        if self.request.output.open_encaps() > 0 {
            return self.fail(DispatchError::local(
                "servant left an encapsulation open in its reply",
            ));
        }

        let reply = &mut self.reply;
        reply.reset_to(REPLY_STATUS_POS);
        reply.write_byte(status.into());
        if status.has_payload() {
            reply.write_encaps(self.request.output.as_slice());
        } else {
            let current = &self.request.current;
            current.id.write(reply);
            reply.write_string_seq(&current.facet);
            reply.write_string(&current.operation);
        }
    }

    fn fail(&mut self, mut err: DispatchError) {
        let current = &self.request.current;
        if let DispatchError::RequestFailed(failed) = &mut err {
            failed.backfill(current);
        }
        if self.config.logs_dispatch_failures() {
            warn!(
                identity = %current.id,
                facet = %current.facet_path(),
                operation = %current.operation,
                status = ?err.status(),
                "dispatch failed: {err}"
            );
        }
        if !self.request.response {
            return;
        }

        let reply = &mut self.reply;
        reply.reset_to(REPLY_STATUS_POS);
        reply.write_byte(err.status().into());
        match &err {
            DispatchError::RequestFailed(failed) => {
                failed.id.write(reply);
                reply.write_string_seq(&failed.facet);
                reply.write_string(&failed.operation);
            }
            err => reply.write_string(&err.to_string()),
        }
    }

    async fn finish_deferred(mut self, deferred: Deferred) {
        match deferred.into_receiver().await {
            Ok(Ok((status, payload))) => {
                self.request.output = payload;
                self.complete(status);
            }
            Ok(Err(err)) => self.fail(err),
            Err(_) => {
                let current = &self.request.current;
                error!(
                    identity = %current.id,
                    operation = %current.operation,
                    "deferred response dropped before completion"
                );
                self.fail(DispatchError::unknown(
                    "deferred response dropped before completion",
                ));
            }
        }
        self.finish().await;
    }

    async fn finish(&mut self) {
        if let Some(LocatedServant {
            locator,
            servant,
            cookie,
        }) = self.located.take()
        {
            let finished = AssertUnwindSafe(locator.finished(
                &self.request.current,
                &servant,
                cookie,
            ))
            .catch_unwind()
            .await;
            if finished.is_err() {
                error!(
                    identity = %self.request.current.id,
                    operation = %self.request.current.operation,
                    "servant locator panicked while finishing a request"
                );
            }
        }

        if let Err(err) = self.request.input.end_read_encaps() {
            warn!(
                identity = %self.request.current.id,
                operation = %self.request.current.operation,
                "failed to close request parameters: {err}"
            );
        }

        if self.request.response {
            let mut reply = mem::take(&mut self.reply);
            finish_message(&mut reply);
            self.connection.send_response(reply, self.compress);
        } else {
            self.connection.send_no_response();
        }
    }
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("request", &self.request)
            .field("compress", &self.compress)
            .field("config", &self.config)
            .field("located", &self.located.is_some())
            .finish_non_exhaustive()
    }
}
