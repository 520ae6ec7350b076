//! Strategy selection.

use crate::config::{CompileOptions, Strategy};
use crate::eager::EagerGraph;
use crate::lazy::LazyGraph;
use crate::monitor::{ExecutionMonitor, Metrics};
use crate::parallel::ParallelGraph;
use trellis_core::{CoreResult, IoSchema, NodeFn, Record, Schema, Value};
use trellis_plan::{Graph, with_profiling};

/// A graph compiled under one of the three strategies
pub enum Compiled {
    /// In-order evaluation
    Eager(EagerGraph),
    /// On-demand evaluation
    Lazy(LazyGraph),
    /// Concurrent evaluation
    Parallel(ParallelGraph),
}

impl Compiled {
    /// Strategy this graph was compiled with
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Eager(_) => Strategy::Eager,
            Self::Lazy(_) => Strategy::Lazy,
            Self::Parallel(_) => Strategy::Parallel,
        }
    }

    /// Evaluate every node and return the produced record
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` for an incomplete input, or a node error
    pub fn run(&self, input: &Record) -> CoreResult<Record> {
        match self {
            Self::Eager(g) => g.run(input),
            Self::Lazy(g) => g.run(input),
            Self::Parallel(g) => g.run(input),
        }
    }

    /// Execution counters
    #[must_use]
    pub fn monitor(&self) -> &ExecutionMonitor {
        match self {
            Self::Eager(g) => g.monitor(),
            Self::Lazy(g) => g.monitor(),
            Self::Parallel(g) => g.monitor(),
        }
    }

    /// Snapshot of execution counters
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        self.monitor().metrics()
    }
}

impl IoSchema for Compiled {
    fn input_schema(&self) -> &Schema {
        match self {
            Self::Eager(g) => g.input_schema(),
            Self::Lazy(g) => g.input_schema(),
            Self::Parallel(g) => g.input_schema(),
        }
    }

    fn output_schema(&self) -> &Schema {
        match self {
            Self::Eager(g) => g.output_schema(),
            Self::Lazy(g) => g.output_schema(),
            Self::Parallel(g) => g.output_schema(),
        }
    }
}

impl NodeFn for Compiled {
    fn call(&self, input: &Record) -> CoreResult<Value> {
        self.run(input).map(Value::Record)
    }
}

/// Compile a graph per the options, profiling it first if a profile key
/// is set
///
/// # Errors
///
/// Returns `Schema` if the profile key is already used by the graph, or
/// `Runtime` if a parallel worker pool cannot be started
pub fn compile(graph: &Graph, options: &CompileOptions) -> CoreResult<Compiled> {
    let profiled;
    let graph = match &options.profile_key {
        Some(key) => {
            profiled = with_profiling(key.clone(), graph)?;
            &profiled
        }
        None => graph,
    };

    tracing::debug!(
        strategy = %options.strategy,
        nodes = graph.len(),
        profiled = options.profile_key.is_some(),
        "compiling graph"
    );

    Ok(match options.strategy {
        Strategy::Eager => Compiled::Eager(compile_eager(graph)),
        Strategy::Lazy => Compiled::Lazy(compile_lazy(graph)),
        Strategy::Parallel => {
            Compiled::Parallel(ParallelGraph::with_config(graph, &options.parallel)?)
        }
    })
}

/// Compile for in-order evaluation
#[must_use]
pub fn compile_eager(graph: &Graph) -> EagerGraph {
    EagerGraph::new(graph)
}

/// Compile for on-demand evaluation
#[must_use]
pub fn compile_lazy(graph: &Graph) -> LazyGraph {
    LazyGraph::new(graph)
}

/// Compile for concurrent evaluation with default pool settings
///
/// # Errors
///
/// Returns `Runtime` if the worker pool cannot be started
pub fn compile_parallel(graph: &Graph) -> CoreResult<ParallelGraph> {
    ParallelGraph::new(graph)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use trellis_core::{CoreError, FnNode, Key};
    use proptest::strategy::Strategy as _;
    use proptest::{prop_assert_eq, proptest};
    use trellis_plan::{ProfileLog, RawGraph, build_graph};

    /// `{n: count(xs), m: sum(xs)/n, m2: sumSquares(xs)/n, v: m2 - m*m}`
    pub(crate) fn stats_graph() -> Graph {
        let raw = RawGraph::new()
            .leaf(
                "v",
                FnNode::new(Schema::new().required("m").required("m2"), |r| {
                    let m = r.f64("m")?;
                    Ok(Value::from(r.f64("m2")? - m * m))
                }),
            )
            .leaf(
                "n",
                FnNode::new(Schema::new().required("xs"), |r| Ok(Value::from(r.f64s("xs")?.len()))),
            )
            .leaf(
                "m",
                FnNode::new(Schema::new().required("xs").required("n"), |r| {
                    Ok(Value::from(r.f64s("xs")?.iter().sum::<f64>() / r.f64("n")?))
                }),
            )
            .leaf(
                "m2",
                FnNode::new(Schema::new().required("xs").required("n"), |r| {
                    let sum: f64 = r.f64s("xs")?.iter().map(|x| x * x).sum();
                    Ok(Value::from(sum / r.f64("n")?))
                }),
            );
        build_graph(&raw).unwrap()
    }

    pub(crate) fn stats_input() -> Record {
        Record::new().with("xs", serde_json::json!([1, 2, 3, 6]))
    }

    /// Leaf returning its first input, counting invocations
    pub(crate) fn counted(calls: &Arc<AtomicUsize>, input: Schema) -> FnNode {
        let calls = Arc::clone(calls);
        let first = input.keys().next().cloned();
        FnNode::new(input, move |r| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(first
                .as_ref()
                .and_then(|k| r.get(k.as_str()).cloned())
                .unwrap_or_default())
        })
    }

    /// Leaf returning its first input after sleeping
    pub(crate) fn sleepy(delay: Duration, input: Schema) -> FnNode {
        let first = input.keys().next().cloned();
        FnNode::new(input, move |r| {
            std::thread::sleep(delay);
            Ok(first
                .as_ref()
                .and_then(|k| r.get(k.as_str()).cloned())
                .unwrap_or_default())
        })
    }

    fn compile_all(graph: &Graph) -> Vec<Compiled> {
        Strategy::ALL
            .into_iter()
            .map(|s| compile(graph, &CompileOptions::new(s)).unwrap())
            .collect()
    }

    #[test]
    fn test_strategy_transparency() {
        let graph = stats_graph();
        let expected = serde_json::json!({ "n": 4, "m": 3.0, "m2": 12.5, "v": 3.5 });

        for compiled in compile_all(&graph) {
            let out = compiled.run(&stats_input()).unwrap();
            assert_eq!(out.to_json(), expected, "strategy {}", compiled.strategy());
            assert_eq!(compiled.input_schema(), graph.input_schema());
            assert_eq!(compiled.output_schema(), graph.output_schema());
        }
    }

    #[test]
    fn test_missing_key_under_every_strategy() {
        let graph = stats_graph();
        for compiled in compile_all(&graph) {
            let err = compiled.run(&Record::new().with("ys", 1)).unwrap_err();
            assert_eq!(err, CoreError::missing("xs"), "strategy {}", compiled.strategy());
        }
    }

    #[test]
    fn test_nested_optional_default_under_every_strategy() {
        let stats = FnNode::new(Schema::new().required("xs"), |_| {
            Ok(Value::from(serde_json::json!({ "mean": 1.0 })))
        })
        .with_output(Schema::new().required("mean").optional("median", 0.0));
        let raw = RawGraph::new().leaf("stats", stats).leaf(
            "z",
            FnNode::new(
                Schema::new().nested("stats", Schema::new().required("mean").optional("median", 2.0)),
                |r| {
                    let stats = r.require("stats")?;
                    Ok(stats.field("median").unwrap_or_default())
                },
            ),
        );
        let graph = build_graph(&raw).unwrap();

        for compiled in compile_all(&graph) {
            let out = compiled.run(&Record::new().with("xs", 1)).unwrap();
            assert_eq!(out.f64("z").unwrap(), 2.0, "strategy {}", compiled.strategy());
        }
    }

    #[test]
    fn test_nested_subgraph_under_every_strategy() {
        let inner = RawGraph::new()
            .leaf(
                "sum",
                FnNode::new(Schema::new().required("xs"), |r| {
                    Ok(Value::from(r.f64s("xs")?.iter().sum::<f64>()))
                }),
            )
            .leaf(
                "mean",
                FnNode::new(Schema::new().required("sum").required("n"), |r| {
                    Ok(Value::from(r.f64("sum")? / r.f64("n")?))
                }),
            );
        let raw = RawGraph::new()
            .leaf(
                "report",
                FnNode::new(
                    Schema::new().nested("inner", Schema::new().required("mean")),
                    |r| Ok(Value::from(format!("mean={}", r.record("inner")?.f64("mean")?))),
                ),
            )
            .subgraph("inner", inner)
            .leaf(
                "n",
                FnNode::new(Schema::new().required("xs"), |r| Ok(Value::from(r.f64s("xs")?.len()))),
            );
        let graph = build_graph(&raw).unwrap();
        assert_eq!(graph.order().map(Key::as_str).collect::<Vec<_>>(), vec!["n", "inner", "report"]);

        for compiled in compile_all(&graph) {
            let out = compiled.run(&stats_input()).unwrap();
            assert_eq!(out.str("report").unwrap(), "mean=3");
            assert_eq!(out.record("inner").unwrap().f64("sum").unwrap(), 12.0);
        }
    }

    #[test]
    fn test_eager_latency_is_sum() {
        let raw = RawGraph::new()
            .leaf("a", sleepy(Duration::from_millis(100), Schema::new().required("x")))
            .leaf("b", sleepy(Duration::from_millis(100), Schema::new().required("x")))
            .leaf("c", sleepy(Duration::from_millis(100), Schema::new().required("x")));
        let graph = build_graph(&raw).unwrap();
        let input = Record::new().with("x", 1);

        let eager = compile(&graph, &CompileOptions::new(Strategy::Eager)).unwrap();
        let start = Instant::now();
        eager.run(&input).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));

        let parallel = compile(&graph, &CompileOptions::new(Strategy::Parallel)).unwrap();
        let start = Instant::now();
        parallel.run(&input).unwrap();
        assert!(start.elapsed() < Duration::from_millis(280));
    }

    #[test]
    fn test_shared_dependency_latency() {
        // a feeds both b and c
        let raw = RawGraph::new()
            .leaf("a", sleepy(Duration::from_millis(60), Schema::new().required("x")))
            .leaf("b", sleepy(Duration::from_millis(60), Schema::new().required("a")))
            .leaf("c", sleepy(Duration::from_millis(90), Schema::new().required("a")));
        let graph = build_graph(&raw).unwrap();
        let input = Record::new().with("x", 1);

        let eager = compile(&graph, &CompileOptions::new(Strategy::Eager)).unwrap();
        let start = Instant::now();
        eager.run(&input).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(210));

        let parallel = compile(&graph, &CompileOptions::new(Strategy::Parallel)).unwrap();
        let start = Instant::now();
        let out = parallel.run(&input).unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_millis(205), "took {elapsed:?}");
        assert_eq!(out.i64("c").unwrap(), 1);
    }

    #[test]
    fn test_profiling_under_every_strategy() {
        let inner = RawGraph::new().leaf(
            "double",
            FnNode::new(Schema::new().required("m"), |r| Ok(Value::from(r.f64("m")? * 2.0))),
        );
        let mut raw = stats_graph().to_raw();
        raw = raw.subgraph("sub", inner);
        let graph = build_graph(&raw).unwrap();
        let plain = compile(&graph, &CompileOptions::default())
            .unwrap()
            .run(&stats_input())
            .unwrap();

        for strategy in Strategy::ALL {
            let options = CompileOptions::new(strategy).with_profiling("__profile");
            let compiled = compile(&graph, &options).unwrap();
            let out = compiled.run(&stats_input()).unwrap();

            let log = out
                .get("__profile")
                .and_then(Value::downcast_ref::<ProfileLog>)
                .unwrap();
            let mut paths: Vec<_> = log.entries().into_iter().map(|(p, _)| p).collect();
            paths.sort();
            assert_eq!(paths, vec!["m", "m2", "n", "sub/double", "v"], "strategy {strategy}");

            let without: Record = out
                .iter()
                .filter(|(k, _)| k.as_str() != "__profile")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            assert_eq!(without, plain);
        }
    }

    #[test]
    fn test_profiling_log_is_per_call() {
        let options = CompileOptions::new(Strategy::Eager).with_profiling("__profile");
        let compiled = compile(&stats_graph(), &options).unwrap();

        let first = compiled.run(&stats_input()).unwrap();
        let second = compiled.run(&stats_input()).unwrap();
        let first_log = first.get("__profile").unwrap();
        let second_log = second.get("__profile").unwrap();
        assert_ne!(first_log, second_log);
        assert_eq!(first_log.downcast_ref::<ProfileLog>().unwrap().len(), 4);
    }

    #[test]
    fn test_profiling_key_conflict() {
        let options = CompileOptions::new(Strategy::Lazy).with_profiling("m");
        assert!(matches!(
            compile(&stats_graph(), &options),
            Err(CoreError::Schema { .. })
        ));
    }

    #[test]
    fn test_compiled_graph_nests_as_leaf() {
        let compiled: Arc<dyn NodeFn> =
            Arc::new(compile(&stats_graph(), &CompileOptions::new(Strategy::Lazy)).unwrap());
        let raw = RawGraph::new().node("stats", compiled).leaf(
            "spread",
            FnNode::new(
                Schema::new().nested("stats", Schema::new().required("v")),
                |r| Ok(Value::from(r.record("stats")?.f64("v")?.sqrt())),
            ),
        );
        let graph = build_graph(&raw).unwrap();
        let out = compile(&graph, &CompileOptions::default())
            .unwrap()
            .run(&stats_input())
            .unwrap();
        assert!((out.f64("spread").unwrap() - 3.5f64.sqrt()).abs() < 1e-12);
    }

    /// Leaf adding `x`, its own index and every value it reads
    fn summing(index: usize, reads: Vec<String>) -> FnNode {
        let schema = reads
            .iter()
            .fold(Schema::new().required("x"), |s, k| s.required(k.as_str()));
        FnNode::new(schema, move |r| {
            let mut total = r.f64("x")? + index as f64;
            for key in &reads {
                total += r.f64(key)?;
            }
            Ok(Value::from(total))
        })
    }

    /// Random DAG over `n{i}`: each node reads up to three earlier nodes
    fn random_dag() -> impl proptest::strategy::Strategy<Value = (Vec<Vec<usize>>, bool)> {
        (1usize..10).prop_flat_map(|n| {
            let deps = (0..n)
                .map(|i| proptest::collection::vec(0..i.max(1), 0..=i.min(3)))
                .collect::<Vec<_>>();
            (deps, proptest::bool::ANY)
        })
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn test_strategies_agree_on_random_graphs((deps, nest) in random_dag()) {
            let mut raw = RawGraph::new();
            for (i, reads) in deps.iter().enumerate() {
                let names = reads.iter().filter(|&&d| d < i).map(|d| format!("n{d}")).collect();
                raw = raw.leaf(format!("n{i}"), summing(i, names));
            }
            if nest {
                raw = RawGraph::new().subgraph("inner", raw);
            }
            let graph = build_graph(&raw).unwrap();
            let input = Record::new().with("x", 0.5);

            let outputs: Vec<_> = compile_all(&graph)
                .iter()
                .map(|compiled| compiled.run(&input).unwrap().to_json())
                .collect();
            prop_assert_eq!(&outputs[0], &outputs[1]);
            prop_assert_eq!(&outputs[0], &outputs[2]);
        }
    }
}
