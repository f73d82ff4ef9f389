//! # nes-join
//!
//! Slice-based stream join: thread-local build-side slices, a global
//! staging merge point, and the `JoinSink`/`JoinSource` handler the
//! executor calls into for `JoinBuild`/`JoinProbeScan` pipelines (spec.md
//! §4.J). One handler serves both the nested-loop (`JoinKind::Cartesian`)
//! and hash (`JoinKind::Inner`) join strategies, since both reduce to
//! bucketing build-side records by join key and choosing how probe
//! crosses buckets.

pub mod handler;
pub mod join_slice;
pub mod staging;
pub mod thread_local_store;
pub mod window_combiner;

pub use handler::StreamJoinOperatorHandler;
pub use join_slice::JoinSlice;
pub use staging::JoinSliceStaging;
pub use thread_local_store::ThreadLocalJoinSliceStore;
pub use window_combiner::JoinWindowCombiner;
