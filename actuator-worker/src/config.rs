use actuator::{duration::parse_duration, EngineKind, InterpreterSettings, DEFAULT_CONFIDENCE};
use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Actuator worker - runs desktop automation scripts handed out by a task queue"
)]
pub struct Cli {
    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true, env = "ACTUATOR_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll the task queue and execute scripts until stopped
    Serve(ServeArgs),
    /// Execute a local script file (JSON or YAML) once and print the result
    Run(RunArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum EngineChoice {
    /// Native input and screen capture
    Desktop,
    /// pyautogui through an external Python interpreter
    Python,
}

impl From<EngineChoice> for EngineKind {
    fn from(choice: EngineChoice) -> Self {
        match choice {
            EngineChoice::Desktop => EngineKind::Desktop,
            EngineChoice::Python => EngineKind::Python,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Engine for scripts that do not name one
    #[arg(long, value_enum, default_value = "desktop", env = "ACTUATOR_ENGINE")]
    pub engine: EngineChoice,

    /// Default image match confidence (0.0 - 1.0)
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE, value_parser = parse_confidence, env = "ACTUATOR_CONFIDENCE")]
    pub confidence: f32,

    /// Directory for screenshots saved without an absolute path
    #[arg(long, env = "ACTUATOR_SCREENSHOT_DIR")]
    pub screenshot_dir: Option<PathBuf>,

    /// Python interpreter for the python engine (default: python3, then python, on PATH)
    #[arg(long, env = "ACTUATOR_PYTHON")]
    pub python: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Base URL of the task queue bridge
    #[arg(long, env = "ACTUATOR_QUEUE_ENDPOINT")]
    pub endpoint: String,

    /// Bearer token sent with every queue request
    #[arg(long, env = "ACTUATOR_QUEUE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Name reported to the queue when polling (default: actuator-<hostname>)
    #[arg(long, env = "ACTUATOR_WORKER_NAME")]
    pub worker_name: Option<String>,

    /// Heartbeat cadence while a task runs (e.g. 30s, 1m, 500ms)
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub heartbeat_interval: Duration,

    /// Long-poll timeout per queue request
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    pub poll_timeout: Duration,

    /// Stop after this many tasks
    #[arg(long)]
    pub max_tasks: Option<u64>,

    /// Report what each script would do without performing it
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Script file; .yml/.yaml is read as YAML, anything else as JSON
    pub script: PathBuf,

    /// Report what the script would do without performing it
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

fn parse_confidence(value: &str) -> Result<f32> {
    let confidence: f32 = value.trim().parse()?;
    if !(0.0..=1.0).contains(&confidence) {
        bail!("confidence must be between 0.0 and 1.0, got {confidence}");
    }
    Ok(confidence)
}

/// `actuator-<hostname>`, or a random suffix when the host name is unavailable
pub fn default_worker_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.trim().is_empty());
    match host {
        Some(host) => format!("actuator-{host}"),
        None => {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("actuator-{}", &id[..8])
        }
    }
}

/// Loaded once at startup and shared read-only
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub worker_name: String,
    pub heartbeat_interval: Duration,
    pub poll_timeout: Duration,
    pub max_tasks: Option<u64>,
    pub dry_run: bool,
    pub default_engine: EngineKind,
    pub default_confidence: f32,
    pub screenshot_dir: PathBuf,
    pub python: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: None,
            worker_name: default_worker_name(),
            heartbeat_interval: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(60),
            max_tasks: None,
            dry_run: false,
            default_engine: EngineKind::Desktop,
            default_confidence: DEFAULT_CONFIDENCE,
            screenshot_dir: PathBuf::from("screenshots"),
            python: None,
        }
    }
}

impl WorkerConfig {
    pub fn from_serve_args(args: ServeArgs) -> Result<Self> {
        let endpoint = args.endpoint.trim().trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            bail!("queue endpoint must be an http(s) URL, got '{}'", args.endpoint);
        }
        if args.heartbeat_interval.is_zero() {
            bail!("heartbeat interval must be greater than zero");
        }
        if args.poll_timeout.is_zero() {
            bail!("poll timeout must be greater than zero");
        }
        let worker_name = args
            .worker_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(default_worker_name);

        let mut config = Self {
            endpoint,
            token: args.token.filter(|token| !token.is_empty()),
            worker_name,
            heartbeat_interval: args.heartbeat_interval,
            poll_timeout: args.poll_timeout,
            max_tasks: args.max_tasks,
            dry_run: args.dry_run,
            ..Self::default()
        };
        config.apply_engine_args(args.engine);
        Ok(config)
    }

    pub fn from_run_args(args: &RunArgs) -> Self {
        let mut config = Self {
            dry_run: args.dry_run,
            ..Self::default()
        };
        config.apply_engine_args(args.engine.clone());
        config
    }

    fn apply_engine_args(&mut self, engine: EngineArgs) {
        self.default_engine = engine.engine.into();
        self.default_confidence = engine.confidence;
        if let Some(dir) = engine.screenshot_dir {
            self.screenshot_dir = dir;
        }
        self.python = engine.python;
    }

    pub fn interpreter_settings(&self) -> InterpreterSettings {
        InterpreterSettings {
            default_engine: self.default_engine,
            default_confidence: self.default_confidence,
            screenshot_dir: self.screenshot_dir.clone(),
        }
    }
}
