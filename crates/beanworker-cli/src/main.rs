mod builtins;

use std::path::PathBuf;

use anyhow::Context;
use beanworker_core::app::{RunnerBuilder, WorkerConfig};
use beanworker_core::observability::init_logging;
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "beanworker")]
#[command(about = "Run a callable for every job reserved from beanstalkd tubes", long_about = None)]
struct Args {
    /// Dotted name of the callable to run (see --list)
    callable: Option<String>,

    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// beanstalkd host
    #[arg(long)]
    host: Option<String>,

    /// beanstalkd port
    #[arg(short, long)]
    port: Option<u16>,

    /// Tube to watch; repeat for several
    #[arg(short = 't', long = "tube")]
    tubes: Vec<String>,

    /// Pass the raw job body instead of decoded fields
    #[arg(long)]
    raw: bool,

    /// Stop after this many seconds without a job
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Log filter, e.g. `info` or `beanworker_core=debug`
    #[arg(long)]
    log_level: Option<String>,

    /// Log file; `-` logs to stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Emit JSON log records
    #[arg(long)]
    log_json: bool,

    /// List the built-in callables and exit
    #[arg(long)]
    list: bool,
}

impl Args {
    /// Command-line values win over the configuration file.
    fn apply(&self, config: &mut WorkerConfig) {
        if let Some(callable) = &self.callable {
            config.callable = Some(callable.clone());
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.raw {
            config.parse = false;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if let Some(file) = &self.log_file {
            config.log.file = (file.as_os_str() != "-").then(|| file.clone());
        }
        if self.log_json {
            config.log.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let registry = builtins::registry()?;

    if args.list {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    args.apply(&mut config);

    let _guard = init_logging(&config.log)?;

    let mut builder = RunnerBuilder::from_config(&config, &registry)?;
    if !args.tubes.is_empty() {
        builder = builder.tubes(args.tubes.clone());
    }
    let mut runner = builder
        .build()
        .context("pass a callable name or set `callable` in the configuration file")?;

    let result = tokio::select! {
        result = runner.run(config.timeout()) => Some(result),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            None
        }
    };
    runner.close().await;

    if let Some(reached) = result.transpose()? {
        info!(%reached, "worker finished");
    }
    Ok(())
}
