//! Trellis CLI
//!
//! Builds the bundled univariate-statistics graph, prints its schemas, and
//! runs it under any compilation strategy.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use serde::Serialize;
use std::path::PathBuf;
use trellis_core::{FnNode, Key, Record, Schema, Value};
use trellis_plan::{ProfileLog, RawGraph, build_graph, build_ordered_graph};
use trellis_runtime::{CompileOptions, Metrics, Strategy, compile};

const PROFILE_KEY: &str = "__profile";

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Trellis - declarative dependency-graph computations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the demo graph's schemas and evaluation order
    Describe {
        /// Build with the strict constructor
        #[arg(long)]
        strict: bool,
    },
    /// Run the demo graph on a JSON input record
    Run {
        /// Execution strategy (eager, lazy, parallel)
        #[arg(short, long)]
        strategy: Option<Strategy>,
        /// Input record as a JSON object
        #[arg(short, long, default_value = r#"{"xs": [1, 2, 3, 6]}"#)]
        input: String,
        /// Record per-leaf durations
        #[arg(short, long)]
        profile: bool,
        /// Compile options as a JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct Description<'a> {
    order: Vec<&'a Key>,
    entry: Vec<&'a Key>,
    exit: Vec<&'a Key>,
    input: &'a Schema,
    output: &'a Schema,
    leaves: Vec<String>,
}

#[derive(Serialize)]
struct RunReport {
    strategy: Strategy,
    output: Record,
    metrics: Metrics,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("trellis=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Describe { strict } => {
            let raw = demo_graph();
            let graph = if strict {
                build_ordered_graph(&raw)?
            } else {
                build_graph(&raw)?
            };
            let (input, output) = trellis_plan::io_schemata(&graph);
            let description = Description {
                order: graph.order().collect(),
                entry: graph.entry_nodes().collect(),
                exit: graph.exit_nodes().collect(),
                input,
                output,
                leaves: graph.leaf_paths(),
            };
            println!("{}", serde_json::to_string_pretty(&description)?);
            Ok(())
        }
        Commands::Run {
            strategy,
            input,
            profile,
            config,
        } => {
            let mut options = match config {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .wrap_err_with(|| format!("reading {}", path.display()))?;
                    CompileOptions::from_json(&text)?
                }
                None => CompileOptions::default(),
            };
            if let Some(strategy) = strategy {
                options.strategy = strategy;
            }
            if profile {
                options.profile_key = Some(Key::from(PROFILE_KEY));
            }

            let input = Record::from_json(
                serde_json::from_str(&input).wrap_err("input is not valid JSON")?,
            )?;
            let graph = build_graph(&demo_graph())?;
            let compiled = compile(&graph, &options)?;
            tracing::info!(strategy = %options.strategy, "running demo graph");

            let output = compiled.run(&input)?;
            if let Some(log) = output.get(PROFILE_KEY).and_then(Value::downcast_ref::<ProfileLog>) {
                tracing::info!(leaves = log.len(), total = ?log.total(), "profile recorded");
            }

            let report = RunReport {
                strategy: compiled.strategy(),
                output,
                metrics: compiled.metrics(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

/// Mean, variance and a nested spread summary of `xs`
fn demo_graph() -> RawGraph {
    let spread = RawGraph::new()
        .leaf(
            "sd",
            FnNode::new(Schema::new().required("v"), |r| Ok(Value::from(r.f64("v")?.sqrt()))),
        )
        .leaf(
            "cv",
            FnNode::new(Schema::new().required("sd").required("m"), |r| {
                Ok(Value::from(r.f64("sd")? / r.f64("m")?))
            }),
        );

    RawGraph::new()
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
        )
        .leaf(
            "v",
            FnNode::new(Schema::new().required("m").required("m2"), |r| {
                let m = r.f64("m")?;
                Ok(Value::from(r.f64("m2")? - m * m))
            }),
        )
        .subgraph("spread", spread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::IoSchema;

    #[test]
    fn test_demo_graph_builds_strictly() {
        let graph = build_ordered_graph(&demo_graph()).unwrap();
        assert_eq!(graph.input_schema(), &Schema::new().required("xs"));
        assert_eq!(graph.leaf_paths(), vec!["n", "m", "m2", "v", "spread/sd", "spread/cv"]);
    }

    #[test]
    fn test_demo_graph_runs() {
        let graph = build_graph(&demo_graph()).unwrap();
        let compiled = compile(&graph, &CompileOptions::new(Strategy::Parallel)).unwrap();
        let input = Record::from_json(serde_json::json!({ "xs": [1, 2, 3, 6] })).unwrap();

        let out = compiled.run(&input).unwrap();
        assert_eq!(out.f64("v").unwrap(), 3.5);
        let spread = out.record("spread").unwrap();
        assert!((spread.f64("sd").unwrap() - 3.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from(["trellis", "run", "--strategy", "lazy", "--profile"]).unwrap();
        match cli.command {
            Commands::Run { strategy, profile, .. } => {
                assert_eq!(strategy, Some(Strategy::Lazy));
                assert!(profile);
            }
            Commands::Describe { .. } => panic!("expected run"),
        }
    }
}
