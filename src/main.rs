//! cfapp: upload and download Cloudflow applications.
//!
//! ```text
//! cfapp upload [DIR] [--overwrite] [--host URL] [--login USER] [--password PW] [--json]
//! cfapp download [DIR] [--overwrite] [--session TOKEN] [--json]
//! ```

use anyhow::Result;
use cfapp_lib::config::config_dir;
use cfapp_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use cfapp_lib::{
    AppError, CloudflowConnector, ConnectionOverrides, ConsoleOutput, JsonOutput, OutputSink,
    SyncEngine, SyncOptions, SyncSettings,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "cfapp", version, about = "Upload and download Cloudflow applications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload every application found under DIR to Cloudflow.
    Upload(SyncArgs),
    /// Download the files of every application found under DIR.
    Download(SyncArgs),
}

#[derive(Args, Debug, Clone)]
struct SyncArgs {
    /// Directory containing project.cfapp files (default: current directory).
    dir: Option<PathBuf>,

    /// Replace files that already exist on the target side.
    #[arg(long)]
    overwrite: bool,

    /// Cloudflow address, e.g. http://localhost:9090.
    #[arg(long)]
    host: Option<String>,

    #[arg(long, visible_alias = "user")]
    login: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Use an existing session instead of logging in.
    #[arg(long)]
    session: Option<String>,

    /// Skip the minimum Cloudflow version check.
    #[arg(long = "force-cloudflow-version")]
    force_version: bool,

    /// Print the output as JSON.
    #[arg(long)]
    json: bool,

    /// Accept invalid SSL certificates.
    #[arg(long = "force-ssl-certificate")]
    accept_invalid_certs: bool,

    /// Maximum number of parallel transfers.
    #[arg(long)]
    concurrency: Option<usize>,
}

impl SyncArgs {
    fn options(&self) -> SyncOptions {
        SyncOptions {
            overwrite: self.overwrite,
            force_version: self.force_version,
            accept_invalid_certs: self.accept_invalid_certs,
            overrides: ConnectionOverrides {
                host: self.host.clone(),
                login: self.login.clone(),
                password: self.password.clone(),
                session: self.session.clone(),
            },
        }
    }
}

/// 初始化日志系统
fn init_logging() {
    let log_dir = get_log_dir();
    let config = LogConfig::load(&log_dir);

    if !config.enabled {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return;
    }

    let env_filter = || {
        let mut filter = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(config.tracing_level().into())
            .from_env_lossy();
        for directive in ["hyper=warn", "reqwest=warn"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    };

    match SizeRotatingWriter::new(&log_dir, config.max_size_mb) {
        Ok(file_writer) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false);

            #[cfg(debug_assertions)]
            let subscriber = tracing_subscriber::registry()
                .with(env_filter())
                .with(file_layer)
                .with(console_layer());

            #[cfg(not(debug_assertions))]
            let subscriber = tracing_subscriber::registry()
                .with(env_filter())
                .with(file_layer);

            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        Err(_) => {
            // 文件日志不可用，回退到控制台
            let subscriber = tracing_subscriber::registry()
                .with(env_filter())
                .with(console_layer());
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
}

/// 控制台日志写到 stderr，stdout 留给进度输出
fn console_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
}

async fn run(upload: bool, args: &SyncArgs, output: Arc<dyn OutputSink>) -> Result<(), AppError> {
    let dir = match &args.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(|e| AppError::Io {
            path: PathBuf::from("."),
            source: e,
        })?,
    };

    let mut settings = SyncSettings::load(&config_dir());
    if let Some(concurrency) = args.concurrency.filter(|c| *c > 0) {
        settings.concurrency = concurrency;
    }

    let engine = SyncEngine::with_settings(Arc::new(CloudflowConnector), output, settings);
    let options = args.options();
    if upload {
        engine.upload(&dir, &options).await?;
    } else {
        engine.download(&dir, &options).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let (upload, args) = match &cli.command {
        Commands::Upload(args) => (true, args),
        Commands::Download(args) => (false, args),
    };

    let result = if args.json {
        let json = Arc::new(JsonOutput::new());
        let result = run(upload, args, json.clone()).await;
        println!(
            "{}",
            serde_json::to_string_pretty(&json.to_json(result.as_ref().err()))?
        );
        result
    } else {
        let result = run(upload, args, Arc::new(ConsoleOutput)).await;
        if let Err(e) = &result {
            eprintln!("error {}: {}", e.code(), e);
        }
        result
    };

    if let Err(e) = result {
        tracing::error!("cfapp 执行失败: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
