pub(crate) mod archive; // tar.gz packing for directory sources
pub mod run; // run state machine
pub mod sink; // destination sinks
pub mod source; // source adapters

pub use run::{BackupRunner, RunFailure, RunReport, RunState};
pub use sink::{DestinationSink, Stored, destination_sink};
pub use source::{SourceAdapter, SourceStream, source_adapter};
