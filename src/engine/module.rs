//! Fetch modules: declarative groups of requests sharing hooks.
//!
//! A [`ModuleClass`] is the definition: how to build the module state from
//! the fetchable, which requests to issue, and the module-scope hooks. Each
//! fetch run instantiates it into a [`Module`], which owns the state and the
//! evaluated requests until the run ends.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::{HarvestError, Result};
use crate::domain::request::ResponseHook;
use crate::domain::{Failure, PreparedRequest, Request, RequestDefaults, RequestState, Response};
use crate::engine::callbacks::{Callback, CallbackRegistry};
use crate::transport::TransportError;

/// Whether a module's requests run one at a time or in the shared batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Sync,
    Concurrent,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Sync => f.write_str("sync"),
            FetchMode::Concurrent => f.write_str("concurrent"),
        }
    }
}

/// Values a `fetch_if` predicate may return.
///
/// `false` and `None` exclude the module.
pub trait Participation {
    fn participates(&self) -> bool;
}

impl Participation for bool {
    fn participates(&self) -> bool {
        *self
    }
}

impl<T: Participation> Participation for Option<T> {
    fn participates(&self) -> bool {
        self.as_ref().is_some_and(Participation::participates)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleCallback {
    BeforeFetch,
    AfterFetch,
    BeforeProcess,
    AfterProcess,
    OnFailure,
    OnError,
}

impl fmt::Display for ModuleCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleCallback::BeforeFetch => "before_fetch",
            ModuleCallback::AfterFetch => "after_fetch",
            ModuleCallback::BeforeProcess => "before_process",
            ModuleCallback::AfterProcess => "after_process",
            ModuleCallback::OnFailure => "on_failure",
            ModuleCallback::OnError => "on_error",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum ModuleEvent {
    BeforeFetch,
    AfterFetch,
    BeforeProcess(Arc<Response>),
    AfterProcess(Arc<Response>),
    Failure(Failure),
    Error(anyhow::Error),
}

impl Callback for ModuleEvent {
    type Kind = ModuleCallback;

    fn kind(&self) -> ModuleCallback {
        match self {
            ModuleEvent::BeforeFetch => ModuleCallback::BeforeFetch,
            ModuleEvent::AfterFetch => ModuleCallback::AfterFetch,
            ModuleEvent::BeforeProcess(_) => ModuleCallback::BeforeProcess,
            ModuleEvent::AfterProcess(_) => ModuleCallback::AfterProcess,
            ModuleEvent::Failure(_) => ModuleCallback::OnFailure,
            ModuleEvent::Error(_) => ModuleCallback::OnError,
        }
    }
}

type Constructor<A, M> = Box<dyn Fn(&A) -> M + Send + Sync>;
type RequestBuilder<M> = Box<dyn Fn(&M) -> Request<M> + Send + Sync>;
type Predicate<M> = Box<dyn Fn(&M) -> bool + Send + Sync>;

/// Definition of a fetch module over fetchable `A` with state `M`.
///
/// ```
/// use harvest::domain::Request;
/// use harvest::engine::{FetchMode, ModuleClass};
///
/// struct Listing {
///     base: String,
///     pages: Vec<String>,
/// }
///
/// let class = ModuleClass::new("listing", |base: &String| Listing {
///     base: base.clone(),
///     pages: Vec::new(),
/// })
/// .mode(FetchMode::Concurrent)
/// .request(|m: &Listing| {
///     Request::get(format!("{}/page/1", m.base)).process(|m: &mut Listing, r| {
///         m.pages.push(r.text().into_owned());
///         Ok(())
///     })
/// })
/// .on_failure(|_, failure| {
///     eprintln!("{failure}");
///     Ok(())
/// });
/// assert_eq!(class.request_count(), 1);
/// ```
pub struct ModuleClass<A, M> {
    name: String,
    mode: FetchMode,
    construct: Constructor<A, M>,
    requests: Vec<RequestBuilder<M>>,
    fetch_if: Option<Predicate<M>>,
    callbacks: CallbackRegistry<M, ModuleEvent>,
}

impl<A, M> ModuleClass<A, M>
where
    A: 'static,
    M: Send + 'static,
{
    /// Start a definition whose default construction is `construct(fetchable)`.
    pub fn new<F>(name: impl Into<String>, construct: F) -> Self
    where
        F: Fn(&A) -> M + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            mode: FetchMode::Sync,
            construct: Box::new(construct),
            requests: Vec::new(),
            fetch_if: None,
            callbacks: CallbackRegistry::new(),
        }
    }

    pub fn mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Declare a request. The builder runs once per instantiation, against
    /// the freshly constructed module state.
    pub fn request<F>(mut self, build: F) -> Self
    where
        F: Fn(&M) -> Request<M> + Send + Sync + 'static,
    {
        self.requests.push(Box::new(build));
        self
    }

    pub fn fetch_if<F, R>(mut self, predicate: F) -> Self
    where
        F: Fn(&M) -> R + Send + Sync + 'static,
        R: Participation,
    {
        self.fetch_if = Some(Box::new(move |state| predicate(state).participates()));
        self
    }

    /// Register a raw module hook for `kind`.
    pub fn register<F>(mut self, kind: ModuleCallback, hook: F) -> Self
    where
        F: Fn(&mut M, &ModuleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.register(kind, hook);
        self
    }

    /// Runs once, before the module's first request goes out.
    pub fn before_fetch<F>(self, hook: F) -> Self
    where
        F: Fn(&mut M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(ModuleCallback::BeforeFetch, move |state, _| hook(state))
    }

    /// Runs once, after the module's last request settles.
    pub fn after_fetch<F>(self, hook: F) -> Self
    where
        F: Fn(&mut M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(ModuleCallback::AfterFetch, move |state, _| hook(state))
    }

    /// Runs for every successful response, before the request's own hooks.
    pub fn before_process<F>(self, hook: F) -> Self
    where
        F: Fn(&mut M, &Response) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(ModuleCallback::BeforeProcess, move |state, event| match event {
            ModuleEvent::BeforeProcess(response) => hook(state, response),
            _ => Ok(()),
        })
    }

    /// Runs for every processed response, before the request's own hook.
    pub fn after_process<F>(self, hook: F) -> Self
    where
        F: Fn(&mut M, &Response) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(ModuleCallback::AfterProcess, move |state, event| match event {
            ModuleEvent::AfterProcess(response) => hook(state, response),
            _ => Ok(()),
        })
    }

    /// Fallback failure hook for requests without their own.
    pub fn on_failure<F>(self, hook: F) -> Self
    where
        F: Fn(&mut M, &Failure) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(ModuleCallback::OnFailure, move |state, event| match event {
            ModuleEvent::Failure(failure) => hook(state, failure),
            _ => Ok(()),
        })
    }

    /// Fallback error hook for requests without their own.
    pub fn on_error<F>(self, hook: F) -> Self
    where
        F: Fn(&mut M, &anyhow::Error) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(ModuleCallback::OnError, move |state, event| match event {
            ModuleEvent::Error(error) => hook(state, error),
            _ => Ok(()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn build(self) -> Arc<dyn ModuleDefinition<A>> {
        Arc::new(self)
    }
}

/// A module definition with its state type erased, as held by a fetcher.
pub trait ModuleDefinition<A>: Send + Sync {
    fn name(&self) -> &str;

    fn mode(&self) -> FetchMode;

    /// Construct a fresh module for one fetch run.
    fn instantiate(self: Arc<Self>, args: &A) -> Module;
}

impl<A, M> ModuleDefinition<A> for ModuleClass<A, M>
where
    A: 'static,
    M: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> FetchMode {
        self.mode
    }

    fn instantiate(self: Arc<Self>, args: &A) -> Module {
        let state = (self.construct)(args);
        let requests = self.requests.iter().map(|build| build(&state)).collect();
        Module {
            inner: Box::new(Instance {
                class: self,
                state,
                requests,
            }),
        }
    }
}

pub(crate) trait ModuleRuntime: Send {
    fn name(&self) -> &str;
    fn mode(&self) -> FetchMode;
    fn participates(&self) -> bool;
    fn prepare(&mut self, defaults: &RequestDefaults) -> Vec<(usize, PreparedRequest)>;
    fn dispatch(&mut self, index: usize);
    fn before_fetch(&mut self) -> Result<()>;
    fn after_fetch(&mut self) -> Result<()>;
    fn settle(
        &mut self,
        index: usize,
        outcome: std::result::Result<Response, TransportError>,
    ) -> Result<RequestState>;
    fn request_states(&self) -> Vec<RequestState>;
}

/// A module instantiated for a single fetch run.
pub struct Module {
    inner: Box<dyn ModuleRuntime>,
}

impl Module {
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn mode(&self) -> FetchMode {
        self.inner.mode()
    }

    /// Result of the module's `fetch_if` predicate; `true` when it has none.
    pub fn participates(&self) -> bool {
        self.inner.participates()
    }

    pub fn request_states(&self) -> Vec<RequestState> {
        self.inner.request_states()
    }

    pub(crate) fn prepare(&mut self, defaults: &RequestDefaults) -> Vec<(usize, PreparedRequest)> {
        self.inner.prepare(defaults)
    }

    pub(crate) fn dispatch(&mut self, index: usize) {
        self.inner.dispatch(index);
    }

    pub(crate) fn before_fetch(&mut self) -> Result<()> {
        self.inner.before_fetch()
    }

    pub(crate) fn after_fetch(&mut self) -> Result<()> {
        self.inner.after_fetch()
    }

    pub(crate) fn settle(
        &mut self,
        index: usize,
        outcome: std::result::Result<Response, TransportError>,
    ) -> Result<RequestState> {
        self.inner.settle(index, outcome)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name())
            .field("mode", &self.mode())
            .field("requests", &self.request_states())
            .finish()
    }
}

struct Instance<A, M> {
    class: Arc<ModuleClass<A, M>>,
    state: M,
    requests: Vec<Request<M>>,
}

impl<A, M> ModuleRuntime for Instance<A, M>
where
    A: 'static,
    M: Send + 'static,
{
    fn name(&self) -> &str {
        &self.class.name
    }

    fn mode(&self) -> FetchMode {
        self.class.mode
    }

    fn participates(&self) -> bool {
        self.class
            .fetch_if
            .as_ref()
            .map_or(true, |predicate| predicate(&self.state))
    }

    fn prepare(&mut self, defaults: &RequestDefaults) -> Vec<(usize, PreparedRequest)> {
        let name = &self.class.name;
        self.requests
            .iter_mut()
            .enumerate()
            .filter_map(|(index, request)| {
                let prepared = request.prepare(defaults);
                if prepared.is_none() {
                    debug!(module = %name, index, "Skipping request without URL");
                }
                prepared.map(|prepared| (index, prepared))
            })
            .collect()
    }

    fn dispatch(&mut self, index: usize) {
        if let Some(request) = self.requests.get_mut(index) {
            request.transition(RequestState::Dispatched);
        }
    }

    fn before_fetch(&mut self) -> Result<()> {
        self.class
            .callbacks
            .invoke(&mut self.state, &ModuleEvent::BeforeFetch)
    }

    fn after_fetch(&mut self) -> Result<()> {
        self.class
            .callbacks
            .invoke(&mut self.state, &ModuleEvent::AfterFetch)
    }

    fn settle(
        &mut self,
        index: usize,
        outcome: std::result::Result<Response, TransportError>,
    ) -> Result<RequestState> {
        let Self {
            class,
            state,
            requests,
        } = self;
        let class: &ModuleClass<A, M> = class;

        let request = requests.get_mut(index).ok_or_else(|| {
            HarvestError::Other(format!("module {} has no request {}", class.name, index))
        })?;
        let url = request.url().unwrap_or_default().to_string();

        let response = match outcome {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                return fail(class, state, request, Failure::from_response(&response));
            }
            Err(error) => return fail(class, state, request, Failure::transport(url, error)),
        };

        let response = Arc::new(response);
        let mut errored = false;

        let before = ModuleEvent::BeforeProcess(Arc::clone(&response));
        if let Err(fatal) = class.callbacks.invoke(state, &before) {
            request.transition(RequestState::Errored);
            return Err(fatal);
        }

        let processed = run_hook(request.hooks.before_process.as_ref(), state, &response)
            .and_then(|()| run_hook(request.hooks.process.as_ref(), state, &response));
        if let Err(error) = processed {
            errored = true;
            if let Err(fatal) = route_error(class, state, request, error) {
                request.transition(RequestState::Errored);
                return Err(fatal);
            }
        }

        let after = ModuleEvent::AfterProcess(Arc::clone(&response));
        if let Err(fatal) = class.callbacks.invoke(state, &after) {
            request.transition(RequestState::Errored);
            return Err(fatal);
        }

        if let Err(error) = run_hook(request.hooks.after_process.as_ref(), state, &response) {
            if errored {
                // The request's error was already routed; on_error runs once.
                warn!(
                    module = %class.name,
                    url = %url,
                    error = %error,
                    "after_process failed on an already errored request"
                );
            } else {
                errored = true;
                if let Err(fatal) = route_error(class, state, request, error) {
                    request.transition(RequestState::Errored);
                    return Err(fatal);
                }
            }
        }

        let settled = if errored {
            RequestState::Errored
        } else {
            RequestState::Succeeded
        };
        request.transition(settled);
        Ok(settled)
    }

    fn request_states(&self) -> Vec<RequestState> {
        self.requests.iter().map(Request::state).collect()
    }
}

fn run_hook<M>(
    hook: Option<&ResponseHook<M>>,
    state: &mut M,
    response: &Response,
) -> anyhow::Result<()> {
    match hook {
        Some(hook) => hook(state, response),
        None => Ok(()),
    }
}

/// HTTP-level failure: the request's own hook wins over the module's.
fn fail<A, M>(
    class: &ModuleClass<A, M>,
    state: &mut M,
    request: &mut Request<M>,
    failure: Failure,
) -> Result<RequestState> {
    request.transition(RequestState::Failed);
    debug!(module = %class.name, failure = %failure, "Request failed");

    match &request.hooks.on_failure {
        Some(hook) => {
            hook(state, &failure).map_err(|e| HarvestError::hook(ModuleCallback::OnFailure, e))?
        }
        None => class
            .callbacks
            .invoke(state, &ModuleEvent::Failure(failure))?,
    }

    Ok(RequestState::Failed)
}

/// Processing error: the request's own hook wins over the module's. With
/// neither, the error is returned as fatal.
fn route_error<A, M>(
    class: &ModuleClass<A, M>,
    state: &mut M,
    request: &Request<M>,
    error: anyhow::Error,
) -> Result<()> {
    if let Some(hook) = &request.hooks.on_error {
        return hook(state, &error).map_err(|e| HarvestError::hook(ModuleCallback::OnError, e));
    }

    if class.callbacks.has(ModuleCallback::OnError) {
        return class.callbacks.invoke(state, &ModuleEvent::Error(error));
    }

    let url = request.url().unwrap_or_default().to_string();
    warn!(module = %class.name, url = %url, error = %error, "Unhandled processing error");
    Err(HarvestError::Processing {
        module: class.name.clone(),
        url,
        source: error,
    })
}
