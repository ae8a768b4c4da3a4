use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossterm::style::Stylize;
use inquire::Confirm as Prompt;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

use insert_dylib::fat::{insert_into_file, Report, SliceReport, Summary};
use insert_dylib::ffi::DylibCommand;
use insert_dylib::stage::{stage, StageOptions};
use insert_dylib::{
    Confirm, Decision, Error, InsertOptions, Insertion, Outcome, OverwritePolicy,
    SignatureAction, StripSignature,
};

#[derive(Parser, Debug)]
#[command(name = "insert_dylib", version, about)]
struct Args {
    /// The dylib path to be inserted
    dylib: String,
    /// The binary to be modified
    binary: PathBuf,
    /// Output path (defaults to `<BINARY>_patched`)
    #[arg(conflicts_with = "inplace")]
    output: Option<PathBuf>,
    /// Modify the binary in place
    #[arg(long, short)]
    inplace: bool,
    /// Insert LC_LOAD_WEAK_DYLIB instead of LC_LOAD_DYLIB
    #[arg(long, short)]
    weak: bool,
    /// Overwrite an existing output file without asking
    #[arg(long)]
    overwrite: bool,
    /// Always remove a trailing LC_CODE_SIGNATURE
    #[arg(long, conflicts_with = "no_strip_codesig")]
    strip_codesig: bool,
    /// Never remove LC_CODE_SIGNATURE
    #[arg(long)]
    no_strip_codesig: bool,
    /// Run without asking for confirmation
    #[arg(long, short('y'), conflicts_with = "no_prompt")]
    all_yes: bool,
    /// Answer no to every question instead of asking
    #[arg(long, short)]
    no_prompt: bool,
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn insert_options(&self) -> InsertOptions {
        let strip_signature = if self.strip_codesig {
            StripSignature::Always
        } else if self.no_strip_codesig {
            StripSignature::Never
        } else {
            StripSignature::Confirm
        };

        InsertOptions {
            weak: self.weak,
            strip_signature,
            overwrite: if self.all_yes {
                OverwritePolicy::Allow
            } else {
                OverwritePolicy::Confirm
            },
        }
    }

    fn stage_options(&self) -> StageOptions {
        StageOptions {
            inplace: self.inplace,
            overwrite: self.overwrite || self.all_yes,
        }
    }
}

/// Answers decisions from the command line flags, prompting on the
/// terminal when neither `--all-yes` nor `--no-prompt` was given.
struct Terminal {
    all_yes: bool,
    no_prompt: bool,
}

impl Confirm for Terminal {
    fn confirm(&mut self, decision: &Decision) -> bool {
        if self.all_yes {
            return true;
        }
        if self.no_prompt {
            return false;
        }

        match Prompt::new(&decision.to_string()).with_default(false).prompt() {
            Ok(answer) => answer,
            Err(e) => {
                warn!("cannot prompt for confirmation: {}", e);
                false
            }
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(args.verbose);

    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Exit status when the user declines to go on before anything is patched.
const DECLINED: u8 = 1;

fn run(args: &Args) -> Result<u8> {
    let mut terminal = Terminal {
        all_yes: args.all_yes,
        no_prompt: args.no_prompt,
    };

    if !args.binary.exists() {
        bail!("Input file `{}` does not exist", args.binary.display());
    }
    if !args.binary.is_file() {
        bail!("Input file `{}` is not a file", args.binary.display());
    }

    if !Path::new(&args.dylib).exists()
        && !terminal.confirm(&Decision::MissingDependency {
            path: args.dylib.clone(),
        })
    {
        return Ok(DECLINED);
    }

    let Some(mut staged) = stage(
        &args.binary,
        args.output.as_deref(),
        args.stage_options(),
        &mut terminal,
    )
    .with_context(|| format!("Failed to create a patched copy of `{}`", args.binary.display()))?
    else {
        return Ok(DECLINED);
    };

    let options = args.insert_options();
    let lc_name = options.command_name();

    let report = match insert_into_file(&mut staged.file, &args.dylib, &options, &mut terminal) {
        Ok(report) => report,
        Err(e) => {
            let path = staged.path.clone();
            if let Err(cleanup) = staged.discard() {
                warn!("failed to remove {}: {}", path.display(), cleanup);
            }
            return Err(e).with_context(|| format!("Failed to patch `{}`", path.display()));
        }
    };

    print_report(&report, lc_name);

    let name = staged.path.display().to_string();
    let summary = report.summary();
    match summary {
        Summary::AllSucceeded => {
            if report.fat {
                println!("Added {} to all archs in {}", lc_name, name.as_str().green());
            } else {
                println!("Added {} to {}", lc_name, name.as_str().green());
            }
            println!("{}", "Done!".green().bold());
        }
        Summary::Partial { succeeded, total } => {
            println!(
                "Added {} to {}/{} archs in {}",
                lc_name,
                succeeded,
                total,
                name.as_str().yellow()
            );
        }
        Summary::AllFailed => {
            if report.fat {
                eprintln!("{}", format!("Failed to add {} to any archs.", lc_name).red());
            } else {
                eprintln!("{}", format!("Failed to add {}!", lc_name).red());
            }
            if let Err(e) = staged.discard() {
                warn!("failed to remove {}: {}", name, e);
            }
        }
    }
    Ok(summary.exit_code())
}

fn print_report(report: &Report, lc_name: &str) {
    if report.fat {
        println!("match {} file", "fat".red());
        println!("Binary is a fat binary with {} archs.", report.slices.len());
    }

    for slice in &report.slices {
        if report.fat {
            println!(
                "arch #{} ({}):",
                slice.index + 1,
                slice.arch_name().unwrap_or("unknown").red()
            );
        }
        if let Some(kind) = slice.kind {
            println!("match {} file", kind.describe().red());
        }
        print_slice(slice, lc_name);
    }
}

fn print_slice(slice: &SliceReport, lc_name: &str) {
    match &slice.result {
        Ok(Outcome::Inserted(insertion)) => print_insertion(slice, insertion),
        Ok(Outcome::Skipped) => {
            println!("Binary already contains a load command for that dylib, skipped.")
        }
        Err(e @ Error::InsufficientSlackSpace { .. }) => {
            eprintln!("{} {}", "Not enough empty space:".red(), e)
        }
        Err(e) => eprintln!("{} {}: {}", "Failed to add".red(), lc_name, e),
    }
}

fn print_insertion(slice: &SliceReport, insertion: &Insertion) {
    match insertion.signature {
        SignatureAction::Stripped { dataoff, datasize } => println!(
            "removed LC_CODE_SIGNATURE ({:#x} bytes at {:#x})",
            datasize, dataoff
        ),
        SignatureAction::Kept => println!(
            "{}",
            "LC_CODE_SIGNATURE was kept; the signature is now invalid.".yellow()
        ),
        SignatureAction::NotLast | SignatureAction::Absent => {}
    }
    if insertion.misplaced_signature {
        println!(
            "{}",
            "LC_CODE_SIGNATURE is not the last load command, so couldn't remove.".yellow()
        );
    }

    let base = slice.arch.map_or(0, |arch| arch.offset);
    println!("writing at offset: {:#x}", base + insertion.offset);

    let header_len = (DylibCommand::SIZE as usize).min(insertion.command.len());
    let (header, path) = insertion.command.split_at(header_len);
    println!("writing: `{:02x?}`", header);
    println!(
        "writing: `{}`",
        path.iter()
            .map(|&b| {
                if b == 0 {
                    '.'.negative().to_string()
                } else {
                    (b as char).to_string()
                }
            })
            .collect::<String>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("insert_dylib").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_missing_dylib_declined_exits_nonzero() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("app");
        fs::write(&binary, b"not patched").unwrap();
        let dylib = dir.path().join("missing.dylib");

        let argv = [dylib.to_str().unwrap(), binary.to_str().unwrap(), "--no-prompt"];
        assert_eq!(run(&args(&argv)).unwrap(), DECLINED);
        assert!(!dir.path().join("app_patched").exists());
    }

    #[test]
    fn test_overwrite_declined_exits_nonzero() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("app");
        let output = dir.path().join("out");
        let dylib = dir.path().join("hook.dylib");
        fs::write(&binary, b"not patched").unwrap();
        fs::write(&output, b"keep me").unwrap();
        fs::write(&dylib, b"").unwrap();

        let argv = [
            dylib.to_str().unwrap(),
            binary.to_str().unwrap(),
            output.to_str().unwrap(),
            "--no-prompt",
        ];
        assert_eq!(run(&args(&argv)).unwrap(), DECLINED);
        assert_eq!(fs::read(&output).unwrap(), b"keep me");
    }

    #[test]
    fn test_declined_exit_differs_from_success() {
        assert_ne!(DECLINED, Summary::AllSucceeded.exit_code());
    }
}
