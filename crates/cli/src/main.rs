//! Command-line interface for streamed archiver execution.
//!
//! Wraps LhA and unzip: lists archives, extracts them with a live progress
//! bar, or streams the cleaned output of an arbitrary command.

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::error::Error;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use streamexec::{ExecConfig, LineControl, Operation, ProgressEvent, Tool};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "arcwrap")]
#[command(version, about = "Run archivers with live progress", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Archiver whose output is decoded
    #[arg(long, value_enum, default_value = "lha", global = true)]
    tool: ToolArg,

    /// Archiver executable (default: lha or unzip)
    #[arg(long, global = true)]
    program: Option<String>,

    /// Idle timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u32>,

    /// Suppress narration
    #[arg(long, global = true)]
    silent: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// JSON file overriding execution settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List an archive and total its contents
    List {
        /// Archive file to list
        archive: PathBuf,
    },

    /// Extract an archive with a progress bar
    Extract {
        /// Archive file to extract
        archive: PathBuf,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Run a command and print its cleaned output
    Run {
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ToolArg {
    Lha,
    Unzip,
}

impl From<ToolArg> for Tool {
    fn from(arg: ToolArg) -> Self {
        match arg {
            ToolArg::Lha => Tool::Lha,
            ToolArg::Unzip => Tool::Unzip,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref());

    let result = match &cli.command {
        Commands::List { archive } => handle_list(&cli, archive),
        Commands::Extract { archive, out } => handle_extract(&cli, archive, out),
        Commands::Run { command } => handle_run(&cli, command),
    };

    match result {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut open_error = None;
    let file_layer = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            Err(e) => {
                open_error = Some((path.to_path_buf(), e));
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    if let Some((path, e)) = open_error {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "could not open log file, logging to stderr only"
        );
    }
}

/// Preset for the tool, overlaid with the JSON config file and flags.
fn build_config(cli: &Cli, operation: Operation) -> Result<ExecConfig, Box<dyn Error>> {
    let mut config = ExecConfig::for_tool(cli.tool.into(), operation);

    if let Some(path) = &cli.config {
        let text = fs::read_to_string(path)?;
        let overlay: Value = serde_json::from_str(&text)?;
        let mut merged = serde_json::to_value(&config)?;
        if let (Value::Object(base), Value::Object(fields)) = (&mut merged, overlay) {
            base.extend(fields);
        } else {
            return Err(format!("{}: expected a JSON object", path.display()).into());
        }
        config = serde_json::from_value(merged)?;
    }

    if let Some(timeout) = cli.timeout {
        config.timeout_seconds = timeout;
    }
    if cli.silent {
        config.silent_mode = true;
    }

    config.validate()?;
    Ok(config)
}

fn program(cli: &Cli) -> String {
    cli.program.clone().unwrap_or_else(|| match Tool::from(cli.tool) {
        Tool::Lha => "lha".to_string(),
        Tool::Unzip => "unzip".to_string(),
    })
}

fn list_command(cli: &Cli, archive: &Path) -> String {
    let archive = shell_word(&archive.to_string_lossy());
    match Tool::from(cli.tool) {
        Tool::Lha => format!("{} l {}", program(cli), archive),
        Tool::Unzip => format!("{} -l {}", program(cli), archive),
    }
}

fn extract_command(cli: &Cli, archive: &Path, out: &Path) -> String {
    let archive = shell_word(&archive.to_string_lossy());
    let out = out.to_string_lossy();
    match Tool::from(cli.tool) {
        Tool::Lha => {
            let dest = shell_word(&format!("{}/", out.trim_end_matches('/')));
            format!("{} x -m -n {} {}", program(cli), archive, dest)
        }
        Tool::Unzip => format!("{} -o {} -d {}", program(cli), archive, shell_word(&out)),
    }
}

/// Quote `word` for the shell unless it is plainly safe.
fn shell_word(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+,:@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

fn cancel_on_ctrlc() -> Result<Arc<AtomicBool>, Box<dyn Error>> {
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel_flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })?;
    Ok(cancel_flag)
}

fn handle_list(cli: &Cli, archive: &Path) -> Result<i32, Box<dyn Error>> {
    let config = build_config(cli, Operation::List)?;
    let cancel_flag = cancel_on_ctrlc()?;

    let stats = streamexec::list(
        &list_command(cli, archive),
        cli.tool.into(),
        &config,
        &|_: &ProgressEvent| true,
        cancel_flag,
    )?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Archive: {}", archive.display());
        println!("Files: {}", stats.file_count);
        println!("Total size: {} bytes", stats.total_size);
        if stats.error_detected {
            println!("The archiver reported errors");
        }
    }
    Ok(0)
}

fn handle_extract(cli: &Cli, archive: &Path, out: &Path) -> Result<i32, Box<dyn Error>> {
    let cancel_flag = cancel_on_ctrlc()?;
    let tool: Tool = cli.tool.into();

    // The listing supplies the total the progress bar counts towards
    let list_config = build_config(cli, Operation::List)?;
    let total_expected = match streamexec::list(
        &list_command(cli, archive),
        tool,
        &list_config,
        &|_: &ProgressEvent| true,
        Arc::clone(&cancel_flag),
    ) {
        Ok(stats) => stats.total_size,
        Err(e) => {
            tracing::warn!(error = %e, "listing failed, extracting without a known total");
            0
        }
    };

    fs::create_dir_all(out)?;
    let config = build_config(cli, Operation::Extract)?;

    let bar = if cli.json || cli.silent {
        ProgressBar::hidden()
    } else if total_expected > 0 {
        let bar = ProgressBar::new(total_expected);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} [{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} {wide_msg}",
            )?
            .progress_chars("#>-"),
        );
        bar
    } else {
        ProgressBar::new_spinner()
    };

    let cb_bar = bar.clone();
    let progress_cb = move |event: &ProgressEvent| {
        if let ProgressEvent::Extracted {
            filename,
            cumulative_bytes,
            ..
        } = event
        {
            cb_bar.set_position(*cumulative_bytes);
            cb_bar.set_message(filename.clone());
        }
        true
    };

    let result = streamexec::extract(
        &extract_command(cli, archive, out),
        tool,
        total_expected,
        &config,
        &progress_cb,
        cancel_flag,
    );
    bar.finish_and_clear();
    let stats = result?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Extracted {} files ({} bytes)", stats.files_extracted, stats.bytes_extracted);
        println!("Destination: {}", out.display());
        if stats.destination_fallback {
            println!("No progress was reported; the destination exists");
        }
    }
    Ok(0)
}

fn handle_run(cli: &Cli, command: &[String]) -> Result<i32, Box<dyn Error>> {
    let mut config = build_config(cli, Operation::List)?;
    config.tool_name = "Command".to_string();
    config.pipe_prefix = "cmd_pipe".to_string();

    let cancel_flag = cancel_on_ctrlc()?;
    let json = cli.json;
    let mut lines = Vec::new();

    let outcome = streamexec::execute(&command.join(" "), &config, &cancel_flag, |line| {
        if json {
            lines.push(line.to_string());
        } else {
            println!("{}", line);
        }
        LineControl::Continue
    })?;

    if json {
        let report = serde_json::json!({
            "lines": lines,
            "stream": outcome.stream,
            "exit_code": outcome.exit_code,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(outcome.exit_code.unwrap_or(0))
}
