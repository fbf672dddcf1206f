//! Command-line harness for Modtime: run an entry call against a module
//! image, or describe one.
//!
//! Images are served from the directory containing the given file, so a
//! `<name>.map` symbol map beside the image is picked up automatically.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use modtime::{
    BackendStrategy, Config, DirStorage, Engine, SyscallContext, SyscallHandler, VmOptions,
};

#[derive(Parser)]
#[command(name = "modtime", version, about = "Sandboxed game-logic module runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a module image and issue one entry call.
    Run {
        /// Path to the module image (`<name>.mtm`).
        image: PathBuf,
        /// Entry index passed to the module's dispatcher.
        #[arg(long, default_value_t = 0)]
        entry: i32,
        /// Argument words, repeatable up to the convention's maximum.
        #[arg(long = "arg")]
        args: Vec<i32>,
        /// Execution backend.
        #[arg(long, value_enum, default_value = "compiled")]
        strategy: Strategy,
        /// Per-call instruction budget.
        #[arg(long)]
        fuel: Option<u64>,
        /// Print a per-symbol call profile after the call.
        #[arg(long)]
        profile: bool,
    },
    /// Load a module image and print its diagnostics summary.
    Describe {
        /// Path to the module image.
        image: PathBuf,
    },
}

#[derive(Copy, Clone, ValueEnum)]
enum Strategy {
    Interpreted,
    Compiled,
    CompiledOnly,
}

impl From<Strategy> for BackendStrategy {
    fn from(strategy: Strategy) -> BackendStrategy {
        match strategy {
            Strategy::Interpreted => BackendStrategy::Interpreted,
            Strategy::Compiled => BackendStrategy::Compiled,
            Strategy::CompiledOnly => BackendStrategy::CompiledOnly,
        }
    }
}

/// Console syscalls for standalone runs: `-1` prints the NUL-terminated
/// string at `args[1]`; anything else is logged and answered with zero.
struct ConsoleHandler;

impl SyscallHandler for ConsoleHandler {
    fn syscall(&self, ctx: &mut SyscallContext<'_>, args: &[i32]) -> anyhow::Result<i32> {
        match args[0] {
            -1 => {
                println!("{}", ctx.read_cstr(args[1] as u32, 4096));
                Ok(0)
            }
            other => {
                log::debug!("unhandled syscall {other}, returning 0");
                Ok(0)
            }
        }
    }
}

fn engine_for(image: &Path, config: &Config) -> Result<(Engine, String)> {
    let dir = image.parent().unwrap_or_else(|| Path::new("."));
    let name = image
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("no module name in {}", image.display()))?
        .to_owned();
    if image.extension().and_then(|e| e.to_str()) != Some("mtm") {
        bail!("expected a .mtm image, got {}", image.display());
    }
    Ok((Engine::new(config, DirStorage::new(dir)), name))
}

fn main() -> Result<()> {
    env_logger::init();
    match Cli::parse().command {
        Command::Run {
            image,
            entry,
            args,
            strategy,
            fuel,
            profile,
        } => {
            let mut config = Config::new();
            config.strategy(strategy.into()).profiling(profile);
            if let Some(budget) = fuel {
                config.fuel(budget);
            }
            let (engine, name) = engine_for(&image, &config)?;
            let vm = engine.create_vm(&name, Rc::new(ConsoleHandler), &VmOptions::default())?;
            let result = engine.call(&vm, entry, &args)?;
            println!("{result}");
            if profile {
                print!("{}", engine.profile_report(&vm)?);
            }
            engine.destroy_all();
            Ok(())
        }
        Command::Describe { image } => {
            let (engine, name) = engine_for(&image, &Config::new())?;
            let vm = engine.create_vm(&name, Rc::new(ConsoleHandler), &VmOptions::default())?;
            let desc = engine.describe(&vm)?;
            println!("name:    {}", desc.name);
            println!("mode:    {}", desc.mode);
            println!("code:    {} bytes", desc.code_size);
            println!("data:    {} bytes", desc.data_size);
            println!("symbols: {}", desc.symbol_count);
            engine.destroy_all();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
