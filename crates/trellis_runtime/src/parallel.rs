//! Parallel compilation.
//!
//! Each call gets its own set of memo cells and a dataflow [`Scheduler`].
//! Nodes with no dependencies start immediately as blocking tasks on a tokio
//! runtime; when a node finishes, every dependent whose last outstanding
//! dependency it was is started in turn. Independent branches therefore
//! overlap and a call's latency is the longest dependency chain, not the sum
//! of all nodes.
//!
//! A nested subgraph does not occupy a worker while it runs. Starting it
//! launches the subgraph's own call on the same pool, and the call that
//! settles its last node settles the parent's node in turn. Only leaf
//! functions ever hold a pool thread.
//!
//! A failed node does not cancel anything: its dependents record the same
//! error without running, and unrelated branches finish normally.

use crate::cell::{Claim, SyncCell};
use crate::config::{ParallelConfig, Strategy};
use crate::monitor::ExecutionMonitor;
use crate::program::Program;
use crate::scheduler::Scheduler;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use trellis_core::{CoreError, CoreResult, IoSchema, Key, NodeFn, Record, Schema, Value};
use trellis_plan::{Graph, Node};

/// Where node tasks run
struct Pool {
    handle: Handle,
    owned: Option<Runtime>,
}

impl Pool {
    fn build(config: &ParallelConfig) -> CoreResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_blocking_threads.max(1))
            .thread_name(config.thread_name.clone())
            .build()
            .map_err(|e| CoreError::runtime(format!("failed to start worker pool: {e}")))?;
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(runtime),
        })
    }

    fn external(handle: Handle) -> Self {
        Self {
            handle,
            owned: None,
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // the last reference may be released on one of the pool's own threads
        if let Some(runtime) = self.owned.take() {
            runtime.shutdown_background();
        }
    }
}

/// One compiled graph level
struct Shared {
    program: Program,
    /// Compiled subgraph per unit, `None` for leaves
    nested: Vec<Option<ParallelGraph>>,
    pool: Arc<Pool>,
    monitor: ExecutionMonitor,
}

/// A graph compiled for concurrent evaluation
#[derive(Clone)]
pub struct ParallelGraph {
    shared: Arc<Shared>,
}

impl ParallelGraph {
    /// Compile a graph with a worker pool built from default settings
    ///
    /// # Errors
    ///
    /// Returns `Runtime` if the worker pool cannot be started
    pub fn new(graph: &Graph) -> CoreResult<Self> {
        Self::with_config(graph, &ParallelConfig::default())
    }

    /// Compile a graph with its own worker pool
    ///
    /// # Errors
    ///
    /// Returns `Runtime` if the worker pool cannot be started
    pub fn with_config(graph: &Graph, config: &ParallelConfig) -> CoreResult<Self> {
        let pool = Arc::new(Pool::build(config)?);
        tracing::debug!(
            max_blocking_threads = config.max_blocking_threads,
            thread_name = %config.thread_name,
            "worker pool started"
        );
        Ok(Self::with_pool(graph, &pool))
    }

    /// Compile a graph that runs its nodes on an existing tokio runtime
    #[must_use]
    pub fn with_handle(graph: &Graph, handle: Handle) -> Self {
        Self::with_pool(graph, &Arc::new(Pool::external(handle)))
    }

    fn with_pool(graph: &Graph, pool: &Arc<Pool>) -> Self {
        let mut compiled = Vec::new();
        let program = Program::build(graph, Strategy::Parallel, |sub| {
            let child = Self::with_pool(sub, pool);
            compiled.push(child.clone());
            Arc::new(child)
        });

        let mut compiled = compiled.into_iter();
        let nested = graph
            .nodes()
            .map(|(_, node)| match node {
                Node::Subgraph(_) => compiled.next(),
                Node::Leaf(_) => None,
            })
            .collect();

        Self {
            shared: Arc::new(Shared {
                program,
                nested,
                pool: Arc::clone(pool),
                monitor: ExecutionMonitor::new(),
            }),
        }
    }

    /// Start every node that can start and return blocking handles
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` if the input lacks a required key
    pub fn spawn(&self, input: &Record) -> CoreResult<PendingRecord> {
        self.shared.program.input.check(input)?;
        Ok(PendingRecord {
            call: self.launch(input.clone(), None),
        })
    }

    /// Run every node and wait for the produced record
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` for an incomplete input, or the first node error
    /// in evaluation order
    pub fn run(&self, input: &Record) -> CoreResult<Record> {
        self.spawn(input)?.wait()
    }

    /// Execution counters
    #[must_use]
    pub fn monitor(&self) -> &ExecutionMonitor {
        &self.shared.monitor
    }

    /// Start a call on an already checked input. `on_finish` receives the
    /// collected record once every node has settled.
    fn launch(&self, input: Record, on_finish: Option<Continuation>) -> Arc<CallState> {
        let shared = &self.shared;
        shared.monitor.record_call();

        let scheduler = Scheduler::new(shared.program.units.iter().map(|u| u.deps.len()));
        let roots = scheduler.initial();
        let call = Arc::new(CallState {
            graph: Arc::clone(shared),
            input,
            cells: (0..shared.program.len()).map(|_| SyncCell::new()).collect(),
            scheduler,
            on_finish: Mutex::new(on_finish),
        });

        for unit in roots {
            spawn_unit(&call, unit);
        }
        // a graph without nodes settles immediately
        call.notify_if_finished();
        call
    }
}

impl IoSchema for ParallelGraph {
    fn input_schema(&self) -> &Schema {
        &self.shared.program.input
    }

    fn output_schema(&self) -> &Schema {
        &self.shared.program.output
    }
}

/// Used as an opaque node function the call blocks its caller; nested
/// subgraphs of a parallel graph never go through here.
impl NodeFn for ParallelGraph {
    fn call(&self, input: &Record) -> CoreResult<Value> {
        self.run(input).map(Value::Record)
    }
}

type Continuation = Box<dyn FnOnce(CoreResult<Record>) + Send>;

/// Everything one call's tasks share
struct CallState {
    graph: Arc<Shared>,
    input: Record,
    cells: Vec<SyncCell>,
    scheduler: Scheduler,
    on_finish: Mutex<Option<Continuation>>,
}

impl CallState {
    fn collect(&self) -> CoreResult<Record> {
        let values = self
            .cells
            .iter()
            .map(SyncCell::wait)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(self.graph.program.collect(values))
    }

    fn notify_if_finished(&self) {
        if !self.scheduler.is_complete() {
            return;
        }
        let on_finish = self.on_finish.lock().take();
        if let Some(on_finish) = on_finish {
            on_finish(self.collect());
        }
    }
}

fn spawn_unit(call: &Arc<CallState>, unit: usize) {
    let task = Arc::clone(call);
    drop(call.graph.pool.handle.spawn_blocking(move || run_unit(&task, unit)));
}

fn run_unit(call: &Arc<CallState>, unit: usize) {
    if !matches!(call.cells[unit].claim(), Claim::Acquired) {
        return;
    }
    let shared = &call.graph;
    let program = &shared.program;
    let key = &program.units[unit].key;

    let upstream = program.units[unit]
        .deps
        .iter()
        .find_map(|&dep| call.cells[dep].get().and_then(Result::err));
    if let Some(err) = upstream {
        shared.monitor.record_skip();
        tracing::debug!(node = %key, "skipped after upstream failure");
        return settle(call, unit, Err(err));
    }

    let args = match program.gather(unit, &call.input, |i| call.cells[i].get().and_then(Result::ok)) {
        Ok(args) => args,
        Err(err) => return settle(call, unit, Err(err)),
    };
    program.start(unit, &shared.monitor);

    if let Some(child) = &shared.nested[unit] {
        let parent = Arc::clone(call);
        child.launch(
            args,
            Some(Box::new(move |result: CoreResult<Record>| {
                let graph = &parent.graph;
                let result = graph
                    .program
                    .complete(unit, result.map(Value::Record), &graph.monitor);
                settle(&parent, unit, result);
            })),
        );
        return;
    }

    let func = &program.units[unit].func;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| func.call(&args)))
        .unwrap_or_else(|payload| Err(CoreError::failed(panic_message(payload.as_ref()))));
    let result = program.complete(unit, outcome, &shared.monitor);
    settle(call, unit, result);
}

/// Record a unit's result, release its dependents and, if it was the last
/// unit, hand the call's record to whoever is waiting on it
fn settle(call: &Arc<CallState>, unit: usize, result: CoreResult<Value>) {
    let succeeded = result.is_ok();
    call.cells[unit].finish(result);

    let dependents = &call.graph.program.units[unit].dependents;
    let ready = if succeeded {
        call.scheduler.mark_complete(dependents)
    } else {
        call.scheduler.mark_failed(dependents)
    };
    for next in ready {
        spawn_unit(call, next);
    }
    call.notify_if_finished();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Output record of one parallel call.
///
/// Nodes keep running in the background whether or not the record is read.
pub struct PendingRecord {
    call: Arc<CallState>,
}

impl PendingRecord {
    /// Block until a produced key is available
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` if the graph does not produce `key`, otherwise
    /// the node's error (or the error of the upstream node that failed)
    pub fn get(&self, key: &str) -> CoreResult<Value> {
        let unit = self
            .call
            .graph
            .program
            .index_of(key)
            .ok_or_else(|| CoreError::missing(key))?;
        self.call.cells[unit].wait()
    }

    /// Whether a key has finished, without blocking
    #[must_use]
    pub fn is_ready(&self, key: &str) -> bool {
        self.call
            .graph
            .program
            .index_of(key)
            .is_some_and(|unit| self.call.cells[unit].is_finished())
    }

    /// Whether every node has settled
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.call.scheduler.is_complete()
    }

    /// Whether any node has failed so far (skipped dependents included)
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.call.scheduler.has_failures()
    }

    /// Produced keys, in evaluation order
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.call.graph.program.units.iter().map(|u| &u.key)
    }

    /// Block until every node finishes and return the produced record
    ///
    /// # Errors
    ///
    /// Returns the first node error in evaluation order
    pub fn wait(&self) -> CoreResult<Record> {
        self.call.collect()
    }
}

impl fmt::Debug for PendingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (unit, key) in self.keys().enumerate() {
            match self.call.cells[unit].get() {
                Some(Ok(value)) => map.entry(key, &value),
                Some(Err(err)) => map.entry(key, &err),
                None => map.entry(key, &format_args!("<pending>")),
            };
        }
        map.finish()
    }
}
