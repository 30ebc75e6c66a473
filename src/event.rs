//! Host lifecycle signals and the dispatcher that delivers them.

use color_eyre::Result;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::http::{Request, Response};
use crate::net::Fetch;

/// Kinds of signal a handler can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalType {
  Install,
  Fetch,
}

/// Lifecycle of one agent version as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  /// Handlers registered, install not yet attempted
  Parsed,
  Installing,
  /// Install succeeded; fetch signals are routed to handlers
  Installed,
  /// Install failed; the host bypasses this version
  Redundant,
}

/// Install signal. Handlers extend its lifetime with [`InstallEvent::wait_until`].
#[derive(Default)]
pub struct InstallEvent {
  extensions: Vec<BoxFuture<'static, Result<()>>>,
}

impl InstallEvent {
  pub fn new() -> Self {
    Self::default()
  }

  /// Keep the signal in flight until `future` resolves. Any failure fails the
  /// whole install.
  pub fn wait_until<F>(&mut self, future: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    self.extensions.push(future.boxed());
  }

  async fn settle(self) -> Result<()> {
    try_join_all(self.extensions).await.map(|_| ())
  }
}

/// Fetch signal carrying the intercepted request.
pub struct FetchEvent {
  request: Arc<Request>,
  response: Option<BoxFuture<'static, Result<Response>>>,
}

impl FetchEvent {
  pub fn new(request: Request) -> Self {
    Self {
      request: Arc::new(request),
      response: None,
    }
  }

  /// The request the host is about to perform.
  pub fn request(&self) -> &Arc<Request> {
    &self.request
  }

  /// Answer the signal with the output of `future`. May be called once.
  pub fn respond_with<F>(&mut self, future: F) -> Result<()>
  where
    F: Future<Output = Result<Response>> + Send + 'static,
  {
    if self.response.is_some() {
      return Err(CacheError::AlreadyResponded.into());
    }
    self.response = Some(future.boxed());
    Ok(())
  }

  pub fn responded(&self) -> bool {
    self.response.is_some()
  }
}

/// A signal that handlers can be registered against.
pub trait Signal: Sized + 'static {
  const TYPE: SignalType;

  #[doc(hidden)]
  fn slot(handlers: &Handlers) -> &Vec<Handler<Self>>;
  #[doc(hidden)]
  fn slot_mut(handlers: &mut Handlers) -> &mut Vec<Handler<Self>>;
}

/// A registered signal handler.
pub type Handler<E> = Arc<dyn Fn(&mut E) -> Result<()> + Send + Sync>;

#[doc(hidden)]
#[derive(Default)]
pub struct Handlers {
  install: Vec<Handler<InstallEvent>>,
  fetch: Vec<Handler<FetchEvent>>,
}

impl Signal for InstallEvent {
  const TYPE: SignalType = SignalType::Install;

  fn slot(handlers: &Handlers) -> &Vec<Handler<Self>> {
    &handlers.install
  }

  fn slot_mut(handlers: &mut Handlers) -> &mut Vec<Handler<Self>> {
    &mut handlers.install
  }
}

impl Signal for FetchEvent {
  const TYPE: SignalType = SignalType::Fetch;

  fn slot(handlers: &Handlers) -> &Vec<Handler<Self>> {
    &handlers.fetch
  }

  fn slot_mut(handlers: &mut Handlers) -> &mut Vec<Handler<Self>> {
    &mut handlers.fetch
  }
}

struct Inner {
  handlers: RwLock<Handlers>,
  state: Mutex<AgentState>,
  network: Arc<dyn Fetch>,
  scope: Box<dyn Fn(&url::Url) -> bool + Send + Sync>,
}

/// Delivers host signals to registered handlers.
///
/// Cloning is cheap; clones share handlers and lifecycle state. Fetch signals
/// that no handler answers, or that arrive while the agent is not installed,
/// go straight to the network.
#[derive(Clone)]
pub struct Dispatcher {
  inner: Arc<Inner>,
}

impl Dispatcher {
  pub fn new(network: Arc<dyn Fetch>) -> Self {
    Self::with_scope(network, |_| true)
  }

  /// Only requests whose URL satisfies `scope` are delivered to fetch handlers.
  pub fn with_scope<F>(network: Arc<dyn Fetch>, scope: F) -> Self
  where
    F: Fn(&url::Url) -> bool + Send + Sync + 'static,
  {
    Self {
      inner: Arc::new(Inner {
        handlers: RwLock::new(Handlers::default()),
        state: Mutex::new(AgentState::Parsed),
        network,
        scope: Box::new(scope),
      }),
    }
  }

  /// Register `handler` for signals of type `E`.
  pub fn on<E, F>(&self, handler: F) -> Result<()>
  where
    E: Signal,
    F: Fn(&mut E) -> Result<()> + Send + Sync + 'static,
  {
    let mut handlers = self
      .inner
      .handlers
      .write()
      .map_err(|_| CacheError::LockPoisoned)?;
    E::slot_mut(&mut handlers).push(Arc::new(handler));
    debug!(signal = ?E::TYPE, "registered handler");
    Ok(())
  }

  pub fn handler_count(&self, signal_type: SignalType) -> Result<usize> {
    let handlers = self
      .inner
      .handlers
      .read()
      .map_err(|_| CacheError::LockPoisoned)?;
    Ok(match signal_type {
      SignalType::Install => InstallEvent::slot(&handlers).len(),
      SignalType::Fetch => FetchEvent::slot(&handlers).len(),
    })
  }

  pub fn state(&self) -> Result<AgentState> {
    self
      .inner
      .state
      .lock()
      .map(|s| *s)
      .map_err(|_| CacheError::LockPoisoned.into())
  }

  fn set_state(&self, state: AgentState) -> Result<()> {
    *self
      .inner
      .state
      .lock()
      .map_err(|_| CacheError::LockPoisoned)? = state;
    Ok(())
  }

  fn handlers<E: Signal>(&self) -> Result<Vec<Handler<E>>> {
    let handlers = self
      .inner
      .handlers
      .read()
      .map_err(|_| CacheError::LockPoisoned)?;
    Ok(E::slot(&handlers).clone())
  }

  /// Deliver the install signal and wait for every lifetime extension.
  ///
  /// Install runs once per dispatcher: repeating it after success is a no-op,
  /// and after failure the agent stays redundant.
  pub async fn dispatch_install(&self) -> Result<()> {
    {
      let mut state = self
        .inner
        .state
        .lock()
        .map_err(|_| CacheError::LockPoisoned)?;
      match *state {
        AgentState::Installed => return Ok(()),
        AgentState::Installing => return Err(CacheError::InstallInProgress.into()),
        AgentState::Redundant => return Err(CacheError::Redundant.into()),
        AgentState::Parsed => *state = AgentState::Installing,
      }
    }

    let result = self.run_install().await;
    match &result {
      Ok(()) => {
        self.set_state(AgentState::Installed)?;
        info!("agent installed");
      }
      Err(e) => {
        self.set_state(AgentState::Redundant)?;
        warn!(error = %e, "agent install failed");
      }
    }
    result
  }

  async fn run_install(&self) -> Result<()> {
    let mut event = InstallEvent::new();
    for handler in self.handlers::<InstallEvent>()? {
      handler(&mut event)?;
    }
    event.settle().await
  }

  /// Deliver a fetch signal and resolve it exactly once.
  pub async fn dispatch_fetch(&self, request: Request) -> Result<Response> {
    if self.state()? != AgentState::Installed || !(self.inner.scope)(request.url()) {
      return self.inner.network.fetch(request).await;
    }

    let mut event = FetchEvent::new(request);
    for handler in self.handlers::<FetchEvent>()? {
      handler(&mut event)?;
    }

    match event.response {
      Some(response) => response.await,
      None => self.inner.network.fetch(event.request.duplicate()?).await,
    }
  }

  /// Channel a host can use to deliver signals from other tasks.
  pub fn channel() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalSender { tx }, SignalReceiver { rx })
  }

  /// Serve signals until every sender is dropped. Each signal runs on its own
  /// task, so fetches are independent of one another.
  pub async fn run(&self, mut receiver: SignalReceiver) {
    while let Some(envelope) = receiver.rx.recv().await {
      let dispatcher = self.clone();
      tokio::spawn(async move {
        match envelope {
          Envelope::Install(reply) => {
            let _ = reply.send(dispatcher.dispatch_install().await);
          }
          Envelope::Fetch(request, reply) => {
            let _ = reply.send(dispatcher.dispatch_fetch(request).await);
          }
        }
      });
    }
  }
}

enum Envelope {
  Install(oneshot::Sender<Result<()>>),
  Fetch(Request, oneshot::Sender<Result<Response>>),
}

/// Host side of the signal channel.
#[derive(Clone)]
pub struct SignalSender {
  tx: mpsc::UnboundedSender<Envelope>,
}

impl SignalSender {
  pub async fn install(&self) -> Result<()> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Envelope::Install(reply))
      .map_err(|_| CacheError::HostClosed)?;
    rx.await.map_err(|_| CacheError::HostClosed)?
  }

  pub async fn fetch(&self, request: Request) -> Result<Response> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Envelope::Fetch(request, reply))
      .map_err(|_| CacheError::HostClosed)?;
    rx.await.map_err(|_| CacheError::HostClosed)?
  }
}

pub struct SignalReceiver {
  rx: mpsc::UnboundedReceiver<Envelope>,
}
