//! Query-runner CLI: loads a YAML query document (spec.md §6), builds and
//! lowers its logical plan, compiles every pipeline against the
//! interpreter backend, wires up the windowing/join handlers and sink
//! registry, then drains the configured input file(s) through a
//! `QueryManager` worker pool until end of stream, flushing on exit.
//!
//! Grounded on `rde-cli`'s `clap::Parser` argument shape and
//! `tracing_subscriber` setup, adapted from the teacher's tokio/mpsc
//! per-operator task graph to the synchronous thread-pool model this
//! workspace's `QueryManager` implements.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nes_compile::Interpreter;
use nes_core::{IdGenerator, OriginId, Schema};
use nes_io::{as_sink_fn, DelimitedFileSource, Source, StdoutSink};
use nes_join::StreamJoinOperatorHandler;
use nes_plan::{LogicalPlan, OperatorKind, PhysicalOperator, PhysicalPlan};
use nes_runtime::{compile_pipeline, Finalizer, HandlerRegistry, QueryManager, SinkRegistry, StatefulHooks, StopType};
use nes_windowing::KeyedSlicePreAggregationHandler;

/// Runs one query document end to end against file-backed sources and a
/// stdout sink.
#[derive(Parser, Debug)]
#[command(name = "nes-engine")]
#[command(about = "Runs a NES-RS query document against file-backed sources")]
struct Args {
    /// Path to the YAML query document.
    query: PathBuf,

    /// Delimited input file feeding the query's primary source.
    #[arg(long)]
    input: PathBuf,

    /// Delimited input file feeding the join's right-hand source, if the
    /// query document declares one.
    #[arg(long)]
    join_input: Option<PathBuf>,

    /// Worker thread count for the `QueryManager` pool.
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Pooled buffer capacity, in tuple-buffer slots.
    #[arg(long, default_value_t = 64)]
    num_buffers: usize,

    /// Size in bytes of each pooled tuple buffer.
    #[arg(long, default_value_t = 4096)]
    buffer_size: usize,

    /// Treat the first line of each input file as a header row.
    #[arg(long)]
    has_header: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::from_default_env()).with(tracing_subscriber::fmt::layer()).init();

    let args = Args::parse();
    let document_text = std::fs::read_to_string(&args.query).with_context(|| format!("reading query document {}", args.query.display()))?;
    let doc = nes_plan::parse_query_document(&document_text)?;

    let ids = IdGenerator::new();
    let (mut plan, _sink_node) = nes_plan::build_plan(&doc, &ids)?;
    plan.infer(&ids)?;
    let physical = nes_plan::lower(&plan, &ids);

    let backend = Interpreter::new();
    let mut compiled = HashMap::new();
    for pipeline in &physical.pipelines {
        let c = compile_pipeline(pipeline, &pipeline.input_schema, &backend).with_context(|| format!("compiling pipeline {:?}", pipeline.id))?;
        compiled.insert(pipeline.id, c);
    }

    let known_origins: Vec<OriginId> =
        plan.nodes().filter(|n| matches!(n.kind, OperatorKind::Source { .. })).flat_map(|n| n.output_origin_ids.clone()).collect();

    let handlers = Arc::new(HandlerRegistry::new());
    let hooks = Arc::new(StatefulHooks::new());
    let mut finalizers: Vec<Finalizer> = Vec::new();
    deploy_stateful_handlers(&physical, args.workers, &known_origins, &ids, &hooks, &mut finalizers);

    let mut sinks = SinkRegistry::new();
    sinks.register(doc.sink.id.clone(), as_sink_fn(Arc::new(StdoutSink::new(doc.sink.id.clone()))));

    let buffer_pool = Arc::new(nes_buffer::BufferPool::new(args.num_buffers, args.buffer_size));
    let manager = QueryManager::new(args.workers, compiled, buffer_pool.clone(), handlers, hooks, Arc::new(sinks), finalizers);

    let primary_schema = source_schema(&plan, &doc.source.id).context("primary source schema missing after inference")?;
    let primary_origin = source_origin(&plan, &doc.source.id).context("primary source origin missing after inference")?;
    let primary_pipeline = root_pipeline_for_schema(&physical, &primary_schema).context("no root pipeline matches the primary source's schema")?;

    let join_target = match &doc.join {
        Some(join) => {
            let schema = source_schema(&plan, &join.right_source.id).context("join right-source schema missing after inference")?;
            let origin = source_origin(&plan, &join.right_source.id).context("join right-source origin missing after inference")?;
            let pipeline = root_pipeline_for_schema(&physical, &schema).context("no root pipeline matches the join's right-source schema")?;
            let path = args.join_input.clone().context("query document declares a join but --join-input was not given")?;
            Some((path, schema, origin, pipeline))
        }
        None => None,
    };

    let manager_ref = &manager;
    std::thread::scope(|scope| -> Result<()> {
        let mut feeders = Vec::new();
        let primary_pool = buffer_pool.clone();
        let primary_path = args.input.clone();
        let has_header = args.has_header;
        feeders.push(scope.spawn(move || {
            drain_source(&primary_path, primary_schema, primary_pool, primary_origin, has_header, manager_ref, primary_pipeline)
        }));
        if let Some((path, schema, origin, pipeline)) = join_target {
            let pool = buffer_pool.clone();
            feeders.push(scope.spawn(move || drain_source(&path, schema, pool, origin, has_header, manager_ref, pipeline)));
        }
        for feeder in feeders {
            feeder.join().expect("feeder thread panicked")?;
        }
        Ok(())
    })?;

    manager.stop(StopType::Graceful);
    Ok(())
}

fn source_schema(plan: &LogicalPlan, name: &str) -> Option<Schema> {
    plan.nodes().find_map(|n| match &n.kind {
        OperatorKind::Source { name: n_name, schema } if n_name == name => Some(schema.clone()),
        _ => None,
    })
}

fn source_origin(plan: &LogicalPlan, name: &str) -> Option<OriginId> {
    plan.nodes().find_map(|n| match &n.kind {
        OperatorKind::Source { name: n_name, .. } if n_name == name => n.output_origin_ids.first().copied(),
        _ => None,
    })
}

/// The pipelines nobody lists as a successor are the ones an external
/// source feeds directly; among those, the one decoding against `schema`
/// is the chain this source's buffers belong to.
fn root_pipeline_for_schema(physical: &PhysicalPlan, schema: &Schema) -> Option<nes_core::PipelineId> {
    let referenced: HashSet<nes_core::PipelineId> = physical.pipelines.iter().flat_map(|p| p.successors.iter().copied()).collect();
    physical.pipelines.iter().find(|p| !referenced.contains(&p.id) && &p.input_schema == schema).map(|p| p.id)
}

#[allow(clippy::too_many_arguments)]
fn drain_source(
    path: &PathBuf,
    schema: Schema,
    pool: Arc<nes_buffer::BufferPool>,
    origin: OriginId,
    has_header: bool,
    manager: &QueryManager<nes_compile::CompiledInterpreter>,
    pipeline: nes_core::PipelineId,
) -> Result<()> {
    let mut source = DelimitedFileSource::new(path.clone(), schema, pool.clone(), origin).with_header(has_header);
    source.open().with_context(|| format!("opening source file {}", path.display()))?;
    loop {
        let buffer = pool.get_buffer_blocking();
        let used = source.fill_tuple_buffer(&buffer)?;
        if used == 0 {
            break;
        }
        manager.submit(pipeline, buffer);
    }
    source.close()?;
    Ok(())
}

/// Scans every compiled operator for an `AggregationBuild`/`JoinBuild`
/// marker and registers the matching handler the first time its id is
/// seen — a query document builds at most one aggregation and one join
/// (`nes_plan::config::build_plan`), so each handler id appears at most
/// once here regardless of how many pipelines reference it.
fn deploy_stateful_handlers(
    physical: &PhysicalPlan,
    num_workers: usize,
    known_origins: &[OriginId],
    ids: &IdGenerator,
    hooks: &StatefulHooks,
    finalizers: &mut Vec<Finalizer>,
) {
    for pipeline in &physical.pipelines {
        for op in &pipeline.operators {
            match op {
                PhysicalOperator::AggregationBuild { handler, group_by, aggregates, window } => {
                    if hooks.aggregation_sink(*handler).is_some() {
                        continue;
                    }
                    let merge_origin = ids.next_origin();
                    let h = Arc::new(KeyedSlicePreAggregationHandler::new(
                        *window,
                        group_by.clone(),
                        aggregates.clone(),
                        num_workers,
                        known_origins.to_vec(),
                        merge_origin,
                    ));
                    hooks.register_aggregation_sink(*handler, h.clone());
                    hooks.register_aggregation_source(*handler, h.clone());
                    let flush_handle = h.clone();
                    finalizers.push(Arc::new(move || flush_handle.flush()));
                }
                PhysicalOperator::JoinBuild { handler, window, .. } => {
                    if hooks.join_sink(*handler).is_some() {
                        continue;
                    }
                    let probe_origin = ids.next_origin();
                    let h = Arc::new(StreamJoinOperatorHandler::new(*window, num_workers, known_origins.to_vec(), probe_origin));
                    hooks.register_join_sink(*handler, h.clone());
                    hooks.register_join_source(*handler, h.clone());
                    let flush_handle = h.clone();
                    finalizers.push(Arc::new(move || flush_handle.flush()));
                }
                _ => {}
            }
        }
    }
}
