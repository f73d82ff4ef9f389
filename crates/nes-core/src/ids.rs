//! Strongly typed identifiers threaded through the buffer, plan, and
//! runtime layers. Kept as thin newtypes over `u64` so they can't be
//! accidentally swapped for one another at call sites (grounded on
//! spec.md §3's invariant that origin ids are injective per query and
//! that `(originId, sequenceNumber, chunkNumber)` totally orders buffers).

use std::fmt;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            pub const INVALID: $name = $name(u64::MAX);

            pub fn new(value: u64) -> Self {
                $name(value)
            }

            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }
    };
}

id_type!(OriginId);
id_type!(SequenceNumber);
id_type!(ChunkNumber);
id_type!(PipelineId);
id_type!(OperatorId);
id_type!(WorkerId);
id_type!(OperatorHandlerId);

/// Monotonically issues fresh ids of a given kind. Owned by the query
/// compiler during plan construction; not a process-wide singleton (see
/// spec.md §9's redesign note on registries).
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: std::sync::atomic::AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { next: std::sync::atomic::AtomicU64::new(0) }
    }

    pub fn next_u64(&self) -> u64 {
        self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    pub fn next_origin(&self) -> OriginId {
        OriginId(self.next_u64())
    }

    pub fn next_operator(&self) -> OperatorId {
        OperatorId(self.next_u64())
    }

    pub fn next_pipeline(&self) -> PipelineId {
        PipelineId(self.next_u64())
    }

    pub fn next_operator_handler(&self) -> OperatorHandlerId {
        OperatorHandlerId(self.next_u64())
    }
}
