use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use strings_worker::telemetry;
use strings_worker::{
    BrokerConnection, FsArtifactStore, LogFormat, SubprocessRunner, TaskExecutor, Worker,
    WorkerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "strings-worker")]
#[command(about = "Task worker that extracts printable strings from files", long_about = None)]
struct Args {
    /// Broker address
    #[arg(short, long, env = "BROKER_URL")]
    broker: Option<String>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long, env = "STRINGS_WORKER_ID")]
    worker_id: Option<String>,

    /// Number of concurrent tasks
    #[arg(short, long, env = "STRINGS_WORKER_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Path to configuration file
    #[arg(long, env = "STRINGS_WORKER_CONFIG")]
    config: Option<PathBuf>,

    /// Path of the strings binary
    #[arg(long, env = "STRINGS_WORKER_TOOL")]
    tool: Option<PathBuf>,

    /// Per-run timeout in seconds
    #[arg(long, env = "STRINGS_WORKER_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Directory for artifacts of tasks without an output path
    #[arg(long, env = "STRINGS_WORKER_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Log format
    #[arg(long, value_enum, env = "STRINGS_WORKER_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

impl Args {
    fn apply(self, config: &mut WorkerConfig) {
        if let Some(broker) = self.broker {
            config.broker_address = broker;
        }
        if let Some(worker_id) = self.worker_id {
            config.worker_id = Some(worker_id);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(tool) = self.tool {
            config.extraction.tool_path = tool;
        }
        if let Some(timeout_secs) = self.timeout_secs {
            config.extraction.timeout_secs = timeout_secs;
        }
        if let Some(output_dir) = self.output_dir {
            config.extraction.output_dir = output_dir;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    telemetry::init_tracing(&config.logging)?;

    let extraction = config.extraction.clone();
    let runner = SubprocessRunner::new(extraction.max_output_bytes, extraction.max_stderr_bytes);
    let executor = TaskExecutor::new(
        Arc::new(runner),
        Arc::new(FsArtifactStore::new()),
        extraction,
    );

    let connection = Arc::new(BrokerConnection::connect(config.broker_address.clone()).await?);
    let worker = Worker::new(config, connection.clone(), executor);

    // Handle shutdown signals
    let signal_worker = worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        signal_worker.shutdown();
    });

    let result = worker.run().await;

    if let Err(e) = connection.close().await {
        tracing::warn!("Failed to close broker connection: {}", e);
    }
    result
}
