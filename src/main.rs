mod cli;
mod commands;
mod config;
mod health;
mod orchestrator;
mod paths;
mod progress;
mod steps;
#[cfg(test)]
mod testing;
mod topology;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use converge::Cancellation;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Exit code for configuration and programming errors
const EXIT_FATAL: i32 = 3;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub json: bool,
    pub config: Option<PathBuf>,
    pub target: Option<String>,
    pub cancel: Cancellation,
}

static INTERRUPTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    if let Some(flag) = INTERRUPTED.get()
        && flag.swap(true, Ordering::SeqCst)
    {
        // SAFETY: _exit is async-signal-safe
        unsafe { libc::_exit(130) };
    }
}

/// Turn the first Ctrl-C into a cancellation checked between steps.
///
/// A second Ctrl-C exits immediately.
fn install_interrupt_handler() -> Cancellation {
    let flag = INTERRUPTED.get_or_init(|| Arc::new(AtomicBool::new(false)));

    #[cfg(unix)]
    {
        let handler = on_interrupt as extern "C" fn(libc::c_int);
        // SAFETY: the handler only touches an atomic and calls _exit
        let previous = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            log::warn!("Could not install the SIGINT handler; Ctrl-C will abort immediately");
        }
    }

    Cancellation::from_flag(flag.clone())
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        json: cli.json,
        config: cli.config,
        target: cli.target,
        cancel: install_interrupt_handler(),
    };
    log::trace!("Verbosity {}", ctx.verbose);

    let result = match cli.command {
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Plan(args) => commands::plan::run(&ctx, args),
        Command::Status => commands::status::run(&ctx),
        Command::Secrets(args) => commands::secrets::run(&ctx, args),
        Command::Doctor => commands::doctor::run(&ctx),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "provision", &mut io::stdout());
            Ok(0)
        }
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}
