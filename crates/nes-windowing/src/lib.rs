//! # nes-windowing
//!
//! Event-time keyed window aggregation: slice assignment, thread-local
//! pre-aggregation, the global slice-staging merge point, and the
//! `AggregationSink`/`AggregationSource` handler the executor calls into
//! for `AggregationBuild`/`AggregationMergeScan` pipelines (spec.md §4.I).

pub mod accumulator;
pub mod group_key;
pub mod handler;
pub mod keyed_slice;
pub mod slice_assigner;
pub mod staging;
pub mod thread_local_store;
pub mod window_combiner;

pub use accumulator::Accumulator;
pub use handler::KeyedSlicePreAggregationHandler;
pub use keyed_slice::KeyedSlice;
pub use slice_assigner::SliceAssigner;
pub use staging::SliceStaging;
pub use thread_local_store::ThreadLocalSliceStore;
pub use window_combiner::WindowCombiner;
