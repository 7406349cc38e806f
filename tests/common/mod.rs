#![allow(dead_code)]

use std::{
    any::Any,
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use servant::{
    locator::LocatorRegistry,
    prelude::*,
    stream::{InputStream, OutputStream},
};
use tokio::sync::{oneshot, watch};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A connection that records what the dispatch engine sends it.
pub struct RecordingConnection {
    replies: Mutex<Vec<Bytes>>,
    no_responses: AtomicUsize,
    sends: watch::Sender<usize>,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingConnection {
            replies: Mutex::new(Vec::new()),
            no_responses: AtomicUsize::new(0),
            sends: watch::channel(0).0,
        })
    }

    pub fn reply_count(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    pub fn no_response_count(&self) -> usize {
        self.no_responses.load(Ordering::SeqCst)
    }

    pub fn last_reply(&self) -> ReplyFrame {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no reply was sent");
        ReplyFrame::decode(reply).unwrap()
    }

    pub async fn wait_for_sends(&self, count: usize) {
        let mut rx = self.sends.subscribe();
        rx.wait_for(|sends| *sends >= count).await.unwrap();
    }
}

impl Connection for RecordingConnection {
    fn send_response(&self, reply: OutputStream, _compress: bool) {
        self.replies.lock().unwrap().push(reply.freeze());
        self.sends.send_modify(|sends| *sends += 1);
    }

    fn send_no_response(&self) {
        self.no_responses.fetch_add(1, Ordering::SeqCst);
        self.sends.send_modify(|sends| *sends += 1);
    }
}

/// Runs a request through the dispatch engine and returns the connection it replied on.
pub async fn dispatch(adapter: &Adapter, frame: &RequestFrame) -> Arc<RecordingConnection> {
    let connection = RecordingConnection::new();
    Incoming::new(
        Some(adapter.clone()),
        connection.clone(),
        frame.request_id,
        frame.response_expected(),
        false,
    )
    .invoke(frame.encode_body())
    .await
    .unwrap();
    connection
}

pub fn encode_string(s: &str) -> Bytes {
    let mut output = OutputStream::new();
    output.write_string(s);
    output.freeze()
}

pub fn decode_string(payload: &Bytes) -> String {
    InputStream::new(payload.clone()).read_string().unwrap()
}

#[derive(Debug)]
pub struct Declared(pub &'static str);

impl std::fmt::Display for Declared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for Declared {}

/// A servant whose behaviour is selected by the operation name.
#[derive(Default)]
pub struct Scripted {
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    pub calls: AtomicUsize,
}

impl Scripted {
    /// A servant whose `gated` operation defers until the returned sender fires.
    pub fn gated() -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Scripted {
                gate: Mutex::new(Some(rx)),
                calls: AtomicUsize::new(0),
            },
            tx,
        )
    }
}

impl Servant for Scripted {
    fn dispatch<'a>(
        &'a self,
        request: &'a mut Request,
    ) -> BoxFuture<'a, Result<DispatchOutcome, DispatchError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request.current().operation.as_str() {
                "ping" => {
                    request.output().write_string("pong");
                    Ok(DispatchStatus::Ok.into())
                }
                "echo" => {
                    let s = request.input().read_string()?;
                    request.output().write_string(&s);
                    Ok(DispatchStatus::Ok.into())
                }
                "context" => {
                    let current = request.current();
                    let value = current.ctx.get("tx").cloned().unwrap_or_default();
                    let described = format!("{value}:{:?}", current.mode);
                    request.output().write_string(&described);
                    Ok(DispatchStatus::Ok.into())
                }
                "declared" => {
                    request.output().write_string("declared");
                    Ok(DispatchStatus::UserException.into())
                }
                "reserved" => Ok(DispatchStatus::UnknownException.into()),
                "fail_local" => Err(DispatchError::local(Declared("disk on fire"))),
                "fail_user" => Err(DispatchError::user(Declared("undeclared"))),
                "fail_unknown" => Err(DispatchError::unknown("mystery")),
                "fail_deeper" => Err(servant::error::RequestFailed::new(
                    servant::error::RequestFailedKind::OperationNotExist,
                )
                .with_operation("deeper")
                .into()),
                "panic" => panic!("servant exploded"),
                "defer" => {
                    let s = request.input().read_string()?;
                    let (deferred, mut response) = request.defer();
                    tokio::spawn(async move {
                        tokio::task::yield_now().await;
                        response.output().write_string(&s);
                        response.ok();
                    });
                    Ok(deferred.into())
                }
                "defer_declared" => {
                    let (deferred, mut response) = request.defer();
                    tokio::spawn(async move {
                        response.output().write_string("late");
                        response.user_exception();
                    });
                    Ok(deferred.into())
                }
                "defer_fail" => {
                    let (deferred, response) = request.defer();
                    tokio::spawn(async move {
                        response.fail(DispatchError::local(Declared("late failure")));
                    });
                    Ok(deferred.into())
                }
                "defer_drop" => {
                    let (deferred, response) = request.defer();
                    drop(response);
                    Ok(deferred.into())
                }
                "gated" => {
                    let gate = self.gate.lock().unwrap().take();
                    let (deferred, mut response) = request.defer();
                    tokio::spawn(async move {
                        if let Some(gate) = gate {
                            let _ = gate.await;
                        }
                        response.output().write_string("opened");
                        response.ok();
                    });
                    Ok(deferred.into())
                }
                _ => Err(DispatchError::operation_not_exist()),
            }
        }
        .boxed()
    }
}

/// A locator that counts its calls and optionally supplies a servant.
pub struct CountingLocator {
    servant: Option<Arc<dyn Servant>>,
    fail: bool,
    panic: bool,
    pub located: AtomicUsize,
    pub finished: AtomicUsize,
    pub cookies: Mutex<Vec<u32>>,
    pub deactivated: Mutex<Vec<String>>,
    witness: Mutex<Option<Arc<RecordingConnection>>>,
    pub sends_seen_at_finish: Mutex<Vec<usize>>,
}

impl CountingLocator {
    fn with(servant: Option<Arc<dyn Servant>>, fail: bool, panic: bool) -> Arc<Self> {
        Arc::new(CountingLocator {
            servant,
            fail,
            panic,
            located: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            cookies: Mutex::new(Vec::new()),
            deactivated: Mutex::new(Vec::new()),
            witness: Mutex::new(None),
            sends_seen_at_finish: Mutex::new(Vec::new()),
        })
    }

    pub fn supplying(servant: Arc<dyn Servant>) -> Arc<Self> {
        CountingLocator::with(Some(servant), false, false)
    }

    pub fn empty() -> Arc<Self> {
        CountingLocator::with(None, false, false)
    }

    pub fn failing() -> Arc<Self> {
        CountingLocator::with(None, true, false)
    }

    pub fn panicking() -> Arc<Self> {
        CountingLocator::with(None, false, true)
    }

    /// Records how many sends `connection` had seen whenever `finished` runs.
    pub fn watch_connection(&self, connection: Arc<RecordingConnection>) {
        *self.witness.lock().unwrap() = Some(connection);
    }

    pub fn located(&self) -> usize {
        self.located.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl ServantLocator for CountingLocator {
    fn locate<'a>(
        &'a self,
        _current: &'a Current,
    ) -> BoxFuture<'a, Result<Option<Located>, DispatchError>> {
        async move {
            let n = self.located.fetch_add(1, Ordering::SeqCst) as u32;
            if self.panic {
                panic!("locator exploded");
            }
            if self.fail {
                return Err(DispatchError::local(Declared("locator unavailable")));
            }
            Ok(self
                .servant
                .clone()
                .map(|servant| (servant, Box::new(n + 100) as Box<dyn Any + Send>)))
        }
        .boxed()
    }

    fn finished<'a>(
        &'a self,
        _current: &'a Current,
        _servant: &'a Arc<dyn Servant>,
        cookie: Cookie,
    ) -> BoxFuture<'a, ()> {
        async move {
            self.finished.fetch_add(1, Ordering::SeqCst);
            if let Ok(cookie) = cookie.downcast::<u32>() {
                self.cookies.lock().unwrap().push(*cookie);
            }
            if let Some(connection) = self.witness.lock().unwrap().as_ref() {
                let sends = connection.reply_count() + connection.no_response_count();
                self.sends_seen_at_finish.lock().unwrap().push(sends);
            }
        }
        .boxed()
    }

    fn deactivate(&self, category: &str) {
        self.deactivated.lock().unwrap().push(category.to_string());
    }
}

/// A connection factory driven by the test.
pub struct FakeFactory {
    endpoint: Endpoint,
    pub activated: AtomicUsize,
    pub held: AtomicBool,
    pub destroyed: AtomicBool,
    finished: watch::Sender<bool>,
    connections: Vec<Arc<dyn Connection>>,
}

impl FakeFactory {
    pub fn new(endpoint: Endpoint) -> Arc<Self> {
        FakeFactory::with_connections(endpoint, Vec::new())
    }

    pub fn with_connections(endpoint: Endpoint, connections: Vec<Arc<dyn Connection>>) -> Arc<Self> {
        Arc::new(FakeFactory {
            endpoint,
            activated: AtomicUsize::new(0),
            held: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            finished: watch::channel(false).0,
            connections,
        })
    }

    /// Marks every connection of this factory as closed.
    pub fn finish(&self) {
        self.finished.send_replace(true);
    }
}

impl IncomingConnectionFactory for FakeFactory {
    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    fn activate(&self) {
        self.activated.fetch_add(1, Ordering::SeqCst);
        self.held.store(false, Ordering::SeqCst);
    }

    fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    fn wait_until_holding(&self) -> BoxFuture<'_, ()> {
        async {}.boxed()
    }

    fn wait_until_finished(&self) -> BoxFuture<'_, ()> {
        let mut rx = self.finished.subscribe();
        async move {
            let _ = rx.wait_for(|finished| *finished).await;
        }
        .boxed()
    }

    fn connections(&self) -> Vec<Arc<dyn Connection>> {
        self.connections.clone()
    }
}

/// A locator registry that remembers what it was told.
#[derive(Default)]
pub struct MemoryRegistry {
    pub adapters: Mutex<HashMap<String, Option<Vec<Endpoint>>>>,
    pub updates: AtomicUsize,
}

impl LocatorRegistry for MemoryRegistry {
    fn set_adapter_endpoints(&self, adapter_id: &str, endpoints: Option<Vec<Endpoint>>) {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.adapters
            .lock()
            .unwrap()
            .insert(adapter_id.to_string(), endpoints);
    }
}
