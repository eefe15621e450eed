//! Knowledge cache: partitioned snapshot storage and lookup.

pub mod base;
pub mod builder;
pub mod chunk;
pub mod index;
pub mod lru;
pub mod record;
pub mod source;
pub mod store;
pub mod stream;

pub use base::{Found, KnowledgeBase, Provenance};
pub use builder::{PartitionedSnapshot, SnapshotBuilder};
pub use index::{PartitionIndex, PartitionMethod};
pub use record::{HorseProfile, RaceRecord, Snapshot, TrackCondition};
pub use store::KnowledgeStore;
