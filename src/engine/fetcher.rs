//! Fetch orchestration.
//!
//! A [`Fetcher`] turns its module definitions into an [`ExecutionPlan`] and
//! runs it: synchronous modules first, one request at a time in plan order,
//! then every concurrent module's requests through one shared [`Batch`].
//! Completions are handled one at a time on the calling task, so hooks never
//! run concurrently with each other.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::app::{HarvestError, Result};
use crate::domain::{PreparedRequest, RequestDefaults, Response};
use crate::engine::callbacks::{Callback, CallbackRegistry};
use crate::engine::module::{FetchMode, Module, ModuleDefinition};
use crate::engine::progress::Progress;
use crate::transport::{Batch, Transport, TransportError, DEFAULT_WORKERS};

pub type ModuleList<A> = Vec<Arc<dyn ModuleDefinition<A>>>;

type Supplier<A> = Box<dyn Fn(&A) -> ModuleList<A> + Send + Sync>;
type InitHook<A> =
    Box<dyn Fn(&A, Arc<dyn ModuleDefinition<A>>) -> anyhow::Result<Module> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherCallback {
    BeforeFetch,
    AfterFetch,
    Progress,
}

impl fmt::Display for FetcherCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetcherCallback::BeforeFetch => f.write_str("before_fetch"),
            FetcherCallback::AfterFetch => f.write_str("after_fetch"),
            FetcherCallback::Progress => f.write_str("progress"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherEvent {
    BeforeFetch,
    AfterFetch,
    Progress(u8),
}

impl Callback for FetcherEvent {
    type Kind = FetcherCallback;

    fn kind(&self) -> FetcherCallback {
        match self {
            FetcherEvent::BeforeFetch => FetcherCallback::BeforeFetch,
            FetcherEvent::AfterFetch => FetcherCallback::AfterFetch,
            FetcherEvent::Progress(_) => FetcherCallback::Progress,
        }
    }
}

enum ModuleSource<A> {
    Static(ModuleList<A>),
    Supplier(Supplier<A>),
}

struct PlanEntry {
    module: usize,
    request: usize,
    prepared: PreparedRequest,
}

/// The filtered, ordered (module, request) pairs of one fetch run.
pub struct ExecutionPlan {
    modules: Vec<Module>,
    entries: Vec<PlanEntry>,
}

/// A read-only view of one plan entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRequest {
    pub module: String,
    pub mode: FetchMode,
    pub method: String,
    pub url: String,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the modules that passed `fetch_if`, in order.
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(Module::name).collect()
    }

    pub fn describe(&self) -> Vec<PlannedRequest> {
        self.entries
            .iter()
            .map(|entry| {
                let module = &self.modules[entry.module];
                PlannedRequest {
                    module: module.name().to_string(),
                    mode: module.mode(),
                    method: entry.prepared.method.to_string(),
                    url: entry.prepared.url.clone(),
                }
            })
            .collect()
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("modules", &self.modules)
            .field("requests", &self.describe())
            .finish()
    }
}

/// Runs a set of fetch modules over one fetchable as a single batch.
///
/// Fetcher hooks receive `&mut A`, the fetchable the fetcher was built
/// with. Modules are constructed from `&A` once per [`Fetcher::fetch`].
pub struct Fetcher<A> {
    fetchable: A,
    modules: ModuleSource<A>,
    init: Option<InitHook<A>>,
    callbacks: CallbackRegistry<A, FetcherEvent>,
    transport: Arc<dyn Transport + Send + Sync>,
    defaults: RequestDefaults,
    workers: usize,
}

impl<A: Send + 'static> Fetcher<A> {
    pub fn new(fetchable: A, transport: Arc<dyn Transport + Send + Sync>) -> Self {
        Self {
            fetchable,
            modules: ModuleSource::Static(Vec::new()),
            init: None,
            callbacks: CallbackRegistry::new(),
            transport,
            defaults: RequestDefaults::default(),
            workers: DEFAULT_WORKERS,
        }
    }

    /// Append a module definition. Replaces a module supplier, if one was set.
    pub fn module(mut self, module: Arc<dyn ModuleDefinition<A>>) -> Self {
        match &mut self.modules {
            ModuleSource::Static(list) => list.push(module),
            ModuleSource::Supplier(_) => self.modules = ModuleSource::Static(vec![module]),
        }
        self
    }

    pub fn modules(mut self, modules: ModuleList<A>) -> Self {
        self.modules = ModuleSource::Static(modules);
        self
    }

    /// Decide the module list at fetch time from the fetchable.
    pub fn module_supplier<F>(mut self, supplier: F) -> Self
    where
        F: Fn(&A) -> ModuleList<A> + Send + Sync + 'static,
    {
        self.modules = ModuleSource::Supplier(Box::new(supplier));
        self
    }

    /// Override default module construction.
    ///
    /// The hook receives each definition and returns the constructed module,
    /// typically by calling `instantiate` with arguments derived from the
    /// fetchable.
    pub fn init<F>(mut self, init: F) -> Self
    where
        F: Fn(&A, Arc<dyn ModuleDefinition<A>>) -> anyhow::Result<Module> + Send + Sync + 'static,
    {
        self.init = Some(Box::new(init));
        self
    }

    pub fn defaults(mut self, defaults: RequestDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Maximum concurrent transfers in the shared batch.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn register<F>(mut self, kind: FetcherCallback, hook: F) -> Self
    where
        F: Fn(&mut A, &FetcherEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.register(kind, hook);
        self
    }

    pub fn before_fetch<F>(self, hook: F) -> Self
    where
        F: Fn(&mut A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(FetcherCallback::BeforeFetch, move |fetchable, _| {
            hook(fetchable)
        })
    }

    pub fn after_fetch<F>(self, hook: F) -> Self
    where
        F: Fn(&mut A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(FetcherCallback::AfterFetch, move |fetchable, _| {
            hook(fetchable)
        })
    }

    pub fn on_progress<F>(self, hook: F) -> Self
    where
        F: Fn(&mut A, u8) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(FetcherCallback::Progress, move |fetchable, event| match event {
            FetcherEvent::Progress(percent) => hook(fetchable, *percent),
            _ => Ok(()),
        })
    }

    pub fn fetchable(&self) -> &A {
        &self.fetchable
    }

    pub fn fetchable_mut(&mut self) -> &mut A {
        &mut self.fetchable
    }

    pub fn into_fetchable(self) -> A {
        self.fetchable
    }

    /// Instantiate modules, apply `fetch_if`, and flatten the surviving
    /// requests into plan order. No request is sent.
    ///
    /// # Errors
    ///
    /// Fails only when the `init` hook fails.
    pub fn plan(&self) -> Result<ExecutionPlan> {
        let definitions = match &self.modules {
            ModuleSource::Static(list) => list.clone(),
            ModuleSource::Supplier(supplier) => supplier(&self.fetchable),
        };

        let mut modules = Vec::new();
        let mut entries = Vec::new();

        for definition in definitions {
            let name = definition.name().to_string();
            let mut module = match &self.init {
                Some(init) => init(&self.fetchable, definition)
                    .map_err(|e| HarvestError::hook("init", e))?,
                None => definition.instantiate(&self.fetchable),
            };

            if !module.participates() {
                debug!(module = %name, "Module excluded by fetch_if");
                continue;
            }

            let index = modules.len();
            entries.extend(
                module
                    .prepare(&self.defaults)
                    .into_iter()
                    .map(|(request, prepared)| PlanEntry {
                        module: index,
                        request,
                        prepared,
                    }),
            );
            modules.push(module);
        }

        debug!(
            modules = modules.len(),
            requests = entries.len(),
            "Built execution plan"
        );

        Ok(ExecutionPlan { modules, entries })
    }

    /// Run every planned request and fire the lifecycle hooks.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: a lifecycle hook failure, or a
    /// processing error with no error hook to receive it. Nothing runs after
    /// a fatal error, `after_fetch` included.
    pub async fn fetch(&mut self) -> Result<()> {
        let plan = self.plan()?;
        self.execute(plan).await
    }

    async fn execute(&mut self, plan: ExecutionPlan) -> Result<()> {
        let ExecutionPlan { modules, entries } = plan;

        let (sequential, concurrent): (Vec<PlanEntry>, Vec<PlanEntry>) = entries
            .into_iter()
            .partition(|entry| modules[entry.module].mode() == FetchMode::Sync);

        info!(
            total = sequential.len() + concurrent.len(),
            sync = sequential.len(),
            concurrent = concurrent.len(),
            "Starting fetch"
        );

        let mut remaining = vec![0usize; modules.len()];
        for entry in sequential.iter().chain(concurrent.iter()) {
            remaining[entry.module] += 1;
        }

        let Self {
            fetchable,
            callbacks,
            transport,
            workers,
            ..
        } = self;

        let mut run = Run {
            fetchable,
            callbacks,
            progress: Progress::new(remaining.iter().sum()),
            started: vec![false; modules.len()],
            modules,
            remaining,
        };

        let start = run.progress.start();
        run.emit(FetcherEvent::Progress(start))?;
        run.emit(FetcherEvent::BeforeFetch)?;

        for entry in sequential {
            run.begin(entry.module, entry.request)?;
            let outcome = transport.perform(&entry.prepared).await;
            run.complete(entry.module, entry.request, outcome)?;
        }

        let mut batch = Batch::with_workers(Arc::clone(transport), *workers);
        for entry in concurrent {
            run.begin(entry.module, entry.request)?;
            batch.enqueue((entry.module, entry.request), entry.prepared);
        }
        batch
            .run(|(module, request), outcome| run.complete(module, request, outcome))
            .await?;

        run.emit(FetcherEvent::AfterFetch)?;

        info!(requests = run.progress.total(), "Fetch complete");
        Ok(())
    }
}

/// Mutable state of one `fetch` call.
struct Run<'a, A> {
    fetchable: &'a mut A,
    callbacks: &'a CallbackRegistry<A, FetcherEvent>,
    progress: Progress,
    modules: Vec<Module>,
    started: Vec<bool>,
    remaining: Vec<usize>,
}

impl<A> Run<'_, A> {
    fn emit(&mut self, event: FetcherEvent) -> Result<()> {
        self.callbacks.invoke(self.fetchable, &event)
    }

    /// Mark a request as sent, firing its module's `before_fetch` first if
    /// this is the module's first request.
    fn begin(&mut self, module: usize, request: usize) -> Result<()> {
        if !self.started[module] {
            self.started[module] = true;
            self.modules[module].before_fetch()?;
        }
        self.modules[module].dispatch(request);
        Ok(())
    }

    fn complete(
        &mut self,
        module: usize,
        request: usize,
        outcome: std::result::Result<Response, TransportError>,
    ) -> Result<()> {
        let state = self.modules[module].settle(request, outcome)?;
        debug!(module = %self.modules[module].name(), request, ?state, "Request settled");

        let percent = self.progress.advance();
        self.emit(FetcherEvent::Progress(percent))?;

        self.remaining[module] -= 1;
        if self.remaining[module] == 0 {
            self.modules[module].after_fetch()?;
        }
        Ok(())
    }
}
