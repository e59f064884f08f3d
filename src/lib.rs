//! Streaming VCF-to-relational-database ingest pipeline.
//!
//! The pipeline stages run in the order the modules are declared below:
//! header freeze, record read, per-ALT decomposition, normalization, row
//! build, batching, binary-COPY encoding, and the coordinator that ties
//! them together under an audit/idempotency contract.

pub mod audit;
pub mod batch;
pub mod config;
pub mod coordinator;
pub mod copyenc;
pub mod decompose;
pub mod error;
pub mod header;
pub mod io;
pub mod normalize;
pub mod progress;
pub mod reader;
pub mod refprovider;
pub mod rowbuild;
pub mod sanitize;
pub mod sink;
pub mod typedvalue;

pub use config::{ChromosomeMode, IngestConfig, NormalizeMode};
pub use coordinator::{LoadCoordinator, LoadSummary};
pub use error::{IngestError, IngestReport};
pub use header::HeaderModel;
