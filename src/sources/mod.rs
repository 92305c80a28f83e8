//! Source coordination.
//!
//! Everything between a project identifier and the data the resolver needs:
//! the coordinator hands out per-URL gateways, gateways drive adapters
//! through the supervisor, and adapters wrap the on-disk clones.

pub mod cache;
pub mod coordinator;
pub mod errors;
pub mod gateway;
pub mod git;
pub mod path;
pub mod probe;
pub mod source;

pub use cache::SourceCache;
pub use coordinator::SourceCoordinator;
pub use errors::SourceError;
pub use gateway::{SourceGateway, SourceState};
pub use git::GitSource;
pub use path::LocalSource;
pub use probe::{CandidateProbe, CandidateSet, GitCandidate, LocalCandidate};
pub use source::SourceAdapter;
