pub mod artifact;
pub mod broker;
pub mod config;
pub mod connection;
pub mod executor;
mod process;
pub mod progress;
pub mod reporter;
pub mod runner;
pub mod telemetry;
pub mod worker;

pub use artifact::{ArtifactStore, FsArtifactStore, NewArtifact};
pub use broker::{Broker, BrokerError};
pub use config::{ConfigError, ExtractionConfig, LogFormat, LoggingConfig, WorkerConfig};
pub use connection::BrokerConnection;
pub use executor::TaskExecutor;
pub use progress::{ChannelProgressSink, ProgressSink, ProgressUpdate};
pub use reporter::{ReportError, Reporter};
pub use runner::{RunError, SubprocessRunner, ToolInvocation, ToolOutput, ToolRunner};
pub use worker::Worker;
