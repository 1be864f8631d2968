// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Devmode supervisor CLI.
//!
//! Runs a project's dev mode in a pseudo-terminal, forwards the terminal to
//! this process, and optionally attaches a debugger to the JVM it starts.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use devmode_supervisor::cli::{self, ColorConfig};
use devmode_supervisor::config::Config;
use devmode_supervisor::debug::port::{add_debug_port_to_start_parms, parse_debug_port_message};
use devmode_supervisor::debug::{
    AttachJob, AttachRequest, DEFAULT_ATTACH_HOST, DebugAttacher, JdwpConnector,
    resolve_debug_port,
};
use devmode_supervisor::project::{BuildType, Project};
use devmode_supervisor::session::{LaunchSpec, ProcessSession, SessionRegistry};

/// Command-line arguments for the supervisor.
#[derive(Parser, Debug)]
#[command(name = "devmode")]
#[command(about = "Run Liberty dev mode in a terminal and attach a debugger to it")]
#[command(version = env!("DEVMODE_VERSION"))]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true)]
    nocolor: bool,
}

/// Subcommands supported by the supervisor.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start dev mode for a project and forward its terminal.
    Start {
        /// Project root directory.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Build tool; detected from the build files when omitted.
        #[arg(long, value_enum)]
        build: Option<BuildType>,

        /// Project name (defaults to the directory name).
        #[arg(long)]
        name: Option<String>,

        /// Start with a debug port and attach a debugger once it opens.
        #[arg(long)]
        debug: bool,

        /// Extra start parameters passed to the build tool.
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        parms: String,

        /// Print lifecycle events as JSON lines on stderr.
        #[arg(long)]
        events: bool,
    },

    /// Wait until a JDWP socket accepts connections.
    Probe {
        /// Debug port.
        port: u16,

        /// Debug host.
        #[arg(long, default_value = DEFAULT_ATTACH_HOST)]
        host: String,

        /// Number of probes (overrides the configured budget).
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Print the debug port of a project whose dev mode is already running.
    DebugPort {
        /// Project root directory.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Build tool; detected from the build files when omitted.
        #[arg(long, value_enum)]
        build: Option<BuildType>,

        /// Start parameters that may already carry the debug port.
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        parms: String,
    },
}

/// Options for `devmode start`.
struct StartOptions {
    path: PathBuf,
    build: Option<BuildType>,
    name: Option<String>,
    debug: bool,
    parms: String,
    events: bool,
}

/// Entry point for the `devmode` binary.
///
/// # Errors
///
/// Returns an error if the subcommand fails.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("devmode_supervisor=info".parse()?)
                .add_directive("devmode=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.clone())?;
    let colors = ColorConfig::new(args.nocolor);

    match args.command {
        Command::Start {
            path,
            build,
            name,
            debug,
            parms,
            events,
        } => {
            let options = StartOptions {
                path,
                build,
                name,
                debug,
                parms,
                events,
            };
            run_start(&config, &colors, options).await
        }
        Command::Probe {
            port,
            host,
            retries,
        } => run_probe(&config, &colors, &host, port, retries).await,
        Command::DebugPort { path, build, parms } => run_debug_port(&path, build, &parms),
    }
}

/// Builds the project model for a directory.
fn load_project(path: &Path, build: Option<BuildType>, name: Option<String>) -> Result<Project> {
    let root = std::fs::canonicalize(path)
        .with_context(|| format!("Project directory {} not found", path.display()))?;

    let build_type = build
        .or_else(|| BuildType::detect(&root))
        .ok_or_else(|| {
            anyhow!(
                "No pom.xml or build.gradle in {}; pass --build",
                root.display()
            )
        })?;

    let name = name
        .or_else(|| {
            root.file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .ok_or_else(|| anyhow!("Cannot derive a project name from {}", root.display()))?;

    Ok(Project::new(name, root, build_type))
}

/// Runs dev mode for a project until it exits or the user interrupts.
///
/// # Errors
///
/// Returns an error if the project cannot be resolved or the process fails
/// to launch.
async fn run_start(config: &Config, colors: &ColorConfig, options: StartOptions) -> Result<()> {
    let project = load_project(&options.path, options.build, options.name)?;

    let mut parms = options.parms;
    let debug_port = if options.debug {
        let (port, source) = resolve_debug_port(&project, &parms, false)?;
        debug!("Debug port {} for {} ({:?})", port, project.name, source);
        parms = add_debug_port_to_start_parms(project.build_type, port, &parms);
        Some(port)
    } else {
        None
    };

    let command = config
        .build_command(project.build_type)
        .command_line(&project.path, &parms);
    let (rows, cols) = cli::terminal_size();
    let launch = LaunchSpec::new(command)
        .cwd(&project.path)
        .size(rows, cols)
        .kill_timeout(config.kill_timeout());

    let registry = SessionRegistry::new();
    let shutdown = CancellationToken::new();

    if options.events {
        spawn_event_printer(&registry, shutdown.clone());
    }

    let session = ProcessSession::start(&registry, &project.name, &launch).await?;
    let pid = session
        .pid()
        .map(|pid| format!(" {}", colors.dim(&format!("(pid {pid})"))))
        .unwrap_or_default();
    eprintln!(
        "{} {}{}",
        colors.dim("Started dev mode for"),
        colors.cyan(&project.name),
        pid
    );

    let output = tokio::spawn(forward_output(session.clone()));
    spawn_input_forwarder(session.clone());

    let attach = debug_port.map(|port| {
        let attacher = Arc::new(DebugAttacher::new(
            JdwpConnector,
            registry.clone(),
            config.attach_settings(),
        ));
        let request = AttachRequest::new(project.name.clone(), port).with_host(&config.attach_host);
        let job = AttachJob::spawn(attacher, request, &shutdown);
        let colors = colors.clone();
        tokio::spawn(async move {
            match job.wait().await {
                Ok(target) => {
                    eprintln!(
                        "{} {}:{} {}",
                        colors.green("Debugger attached to"),
                        target.host,
                        target.port,
                        colors.dim(&format!("({})", target.launch))
                    );
                    // Release the JDWP slot so an IDE can take it over.
                    drop(target.handle.into_stream());
                }
                Err(e) if e.is_cancelled() => {
                    eprintln!("{}", colors.yellow("Debugger attach cancelled"));
                }
                Err(e) => eprintln!("{} {e}", colors.red("Debugger attach failed:")),
            }
        })
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Interrupted, stopping dev mode for {}", project.name);
        }
        () = session.wait_closed() => {}
    }

    shutdown.cancel();
    registry.shutdown().await;

    if let Err(e) = output.await {
        debug!("Output forwarder ended abnormally: {}", e);
    }
    if let Some(attach) = attach {
        if let Err(e) = attach.await {
            debug!("Attach reporter ended abnormally: {}", e);
        }
    }

    eprintln!("{}", colors.dim("Dev mode session ended"));
    Ok(())
}

/// Copies terminal output to stdout until the session closes, noting the
/// debug port banner when dev mode prints it.
async fn forward_output(session: Arc<ProcessSession>) {
    let mut output = session.subscribe();
    let mut stdout = tokio::io::stdout();
    let mut line = String::new();

    loop {
        let chunk = tokio::select! {
            chunk = output.recv() => chunk,
            () = session.wait_closed() => {
                // Drain what the reader pushed before the close.
                while let Ok(chunk) = output.try_recv() {
                    if let Err(e) = stdout.write_all(&chunk).await {
                        debug!("Dropped trailing terminal output: {}", e);
                        break;
                    }
                }
                break;
            }
        };

        match chunk {
            Ok(chunk) => {
                if stdout.write_all(&chunk).await.is_err() {
                    break;
                }
                if let Err(e) = stdout.flush().await {
                    debug!("Failed to flush terminal output: {}", e);
                }
                scan_lines(&mut line, &chunk);
            }
            Err(RecvError::Lagged(n)) => {
                warn!("Terminal output fell behind, skipped {} chunk(s)", n);
            }
            Err(RecvError::Closed) => break,
        }
    }

    if let Err(e) = stdout.flush().await {
        debug!("Failed to flush terminal output: {}", e);
    }
}

/// Accumulates output into lines and reports the debug port banner.
fn scan_lines(line: &mut String, chunk: &[u8]) {
    line.push_str(&String::from_utf8_lossy(chunk));
    while let Some(end) = line.find('\n') {
        if let Some(port) = parse_debug_port_message(&line[..end]) {
            info!("Dev mode reports debug port {}", port);
        }
        line.replace_range(..=end, "");
    }
}

/// Forwards stdin to the session on a detached thread; stdin reads cannot
/// be interrupted, so the thread is left behind at exit.
fn spawn_input_forwarder(session: Arc<ProcessSession>) {
    let spawned = std::thread::Builder::new()
        .name("devmode-stdin".to_string())
        .spawn(move || {
            let mut stdin = std::io::stdin();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if session.write(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        });

    if let Err(e) = spawned {
        warn!("Failed to start stdin forwarder: {}", e);
    }
}

/// Prints registry events as JSON lines on stderr.
fn spawn_event_printer(registry: &SessionRegistry, shutdown: CancellationToken) {
    let mut events = registry.events().subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                () = shutdown.cancelled() => break,
            };
            match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => eprintln!("{json}"),
                    Err(e) => warn!("Failed to serialize event: {}", e),
                },
                Err(RecvError::Lagged(n)) => warn!("Skipped {} event(s)", n),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Waits for a JDWP socket and reports whether it opened.
///
/// # Errors
///
/// Returns an error if the socket does not open within the probe budget or
/// the wait is interrupted.
async fn run_probe(
    config: &Config,
    colors: &ColorConfig,
    host: &str,
    port: u16,
    retries: Option<u32>,
) -> Result<()> {
    let mut settings = config.attach_settings();
    if let Some(retries) = retries {
        settings.probe_retries = retries;
    }

    let attacher = DebugAttacher::new(JdwpConnector, SessionRegistry::new(), settings);
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    attacher
        .wait_for_listening("probe", host, port, &cancel)
        .await?;
    println!("{} {host}:{port}", colors.green("Listening:"));
    Ok(())
}

/// Prints the debug port of a running dev mode.
///
/// # Errors
///
/// Returns an error if the project or its `server.env` cannot be resolved.
fn run_debug_port(path: &Path, build: Option<BuildType>, parms: &str) -> Result<()> {
    let project = load_project(path, build, None)?;
    let (port, source) = resolve_debug_port(&project, parms, true)?;
    debug!("Debug port for {} from {:?}", project.name, source);
    println!("{port}");
    Ok(())
}
