use std::{env, io, path};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::Verbosity;
use fs_err as fs;
use itertools::Itertools;
use log::info;

#[derive(Parser)]
#[command(version, about, long_about = None, author = clap::crate_authors!(), subcommand_required = true)]
struct Cli {
    /// Peripheral schema (XML). The builtin ATmega328P schema is used when absent.
    #[arg(long, global = true)]
    schema: Option<String>,

    #[command(flatten)]
    verbose: Verbosity,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Parse the schema, and the configuration snapshot if given, without doing anything
    DryRun {
        #[arg(long)]
        config: Option<String>,
    },
    /// List the peripherals described by the schema
    LsPeriph {
        #[arg(long, default_value = "schema")]
        sorting: Sorting,
    },
    /// Report conflicts and validity problems of a configuration snapshot
    Check {
        /// Configuration snapshot (JSON)
        #[arg(long)]
        config: String,
        /// Print diagnostics as JSON
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
    /// Generate initialization code and interrupt handlers
    Gen {
        /// Configuration snapshot (JSON)
        #[arg(long)]
        config: String,
        /// Write `peripherals.h` and `peripherals.c` into this directory instead of printing them
        #[arg(long)]
        out_dir: Option<String>,
        /// CPU clock in Hz, overrides the schema's
        #[arg(long)]
        clock: Option<u32>,
        /// Refuse to generate if any pin conflict is found
        #[arg(long, action = clap::ArgAction::SetTrue)]
        deny_conflicts: bool,
        /// Stamp the output with the generation time
        #[arg(long, action = clap::ArgAction::SetTrue)]
        stamp: bool,
        /// Print the artifact as JSON
        #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with = "out_dir")]
        json: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Sorting {
    /// Schema order
    Schema,
    Alpha,
}

fn string_to_path(s: &str) -> Result<path::PathBuf, io::Error> {
    env::current_dir()?
        .join(s)
        // Canonicalize paths for clear output
        .canonicalize()
}

fn existing_file(s: &str) -> anyhow::Result<path::PathBuf> {
    let path = string_to_path(s).with_context(|| format!("file does not exist: {s}"))?;
    if !path.is_file() {
        return Err(anyhow!("not a file: {}", path.display()));
    }
    Ok(path)
}

fn load_schema(cli: &Cli) -> anyhow::Result<periphgen::Schema> {
    match &cli.schema {
        Some(s) => {
            let path = existing_file(s)?;
            periphgen::load_schema(&path)
                .with_context(|| format!("could not load schema from {}", path.display()))
        }
        None => periphgen::Schema::builtin().context("builtin schema is broken"),
    }
}

fn load_snapshot(s: &str) -> anyhow::Result<periphgen::ConfigurationSnapshot> {
    let path = existing_file(s)?;
    periphgen::load_snapshot(&path)
        .with_context(|| format!("could not load configuration from {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let Some(cmd) = &cli.command else {
        println!("Nothing to do. Please issue a subcommand.");
        return Ok(());
    };
    match cmd {
        Command::DryRun { config } => {
            let schema = cli.schema.as_deref().map(existing_file).transpose()?;
            let config = config.as_deref().map(existing_file).transpose()?;
            match periphgen::dry_run(schema.as_deref(), config.as_deref())
                .context("could not execute dry run")
            {
                Ok(()) => println!("periphgen: dry run completed successfully"),
                Err(e) => println!("periphgen: exited unsuccessfully: {e:?}"),
            }
        }
        Command::LsPeriph { sorting } => ls_periph(&load_schema(&cli)?, *sorting),
        Command::Check { config, json } => {
            let schema = load_schema(&cli)?;
            let snapshot = load_snapshot(config)?;
            let diagnostics = periphgen::check(&schema, &snapshot);
            print_diagnostics(&diagnostics, *json);
            if diagnostics.iter().any(periphgen::Diagnostic::is_error) {
                return Err(anyhow!("configuration has errors"));
            }
        }
        Command::Gen {
            config,
            out_dir,
            clock,
            deny_conflicts,
            stamp,
            json,
        } => {
            let schema = load_schema(&cli)?;
            let snapshot = load_snapshot(config)?;
            generate(
                &schema,
                &snapshot,
                out_dir.as_deref(),
                *clock,
                *deny_conflicts,
                *stamp,
                *json,
            )?;
        }
    }

    Ok(())
}

fn ls_periph(schema: &periphgen::Schema, sorting: Sorting) {
    let mut peripherals = schema.peripherals().iter().collect::<Vec<_>>();
    if peripherals.is_empty() {
        println!("periphgen: no peripherals found in schema");
        return;
    }
    match sorting {
        Sorting::Schema => { /* do nothing */ }
        Sorting::Alpha => peripherals.sort_by(|a, b| a.id.as_ref().cmp(b.id.as_ref())),
    }
    let longest = peripherals
        .iter()
        .map(|p| p.id.as_ref().len())
        .max()
        .unwrap_or_default();
    for p in peripherals {
        let pins = p
            .pin_mapping
            .iter()
            .map(|(signal, pins)| format!("{signal}={}", pins.iter().join("|")))
            .join(" ");
        println!(
            "{: <longest$} {: <9} {} {pins}",
            p.id.as_ref(),
            p.kind.to_string(),
            p.name
        );
    }
}

fn print_diagnostics(diagnostics: &[periphgen::Diagnostic], as_json: bool) {
    if as_json {
        let array = diagnostics
            .iter()
            .map(periphgen::Diagnostic::to_json)
            .collect::<Vec<_>>();
        println!("{}", json::JsonValue::from(array).pretty(2));
    } else {
        for d in diagnostics {
            eprintln!("{d}");
        }
    }
}

fn generate(
    schema: &periphgen::Schema,
    snapshot: &periphgen::ConfigurationSnapshot,
    out_dir: Option<&str>,
    clock: Option<u32>,
    deny_conflicts: bool,
    stamp: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    let diagnostics = periphgen::check(schema, snapshot);
    if !as_json {
        print_diagnostics(&diagnostics, false);
    }
    let conflicts = diagnostics
        .iter()
        .filter(|d| d.kind == periphgen::DiagnosticKind::Conflict)
        .count();
    if deny_conflicts && conflicts != 0 {
        return Err(anyhow!("refusing to generate: {conflicts} pin conflicts"));
    }

    let mut config = periphgen::GenerateConfig::new().timestamp(stamp);
    if let Some(clock) = clock {
        config = config.clock_hz(clock);
    }
    let artifact = periphgen::generate(schema, snapshot, &config)?;

    if as_json {
        let mut output = artifact.to_json();
        output["diagnostics"] = diagnostics
            .iter()
            .map(periphgen::Diagnostic::to_json)
            .collect::<Vec<_>>()
            .into();
        println!("{}", output.pretty(2));
        return Ok(());
    }

    match out_dir {
        Some(dir) => {
            let dir = path::Path::new(dir);
            fs::create_dir_all(dir)?;
            for (name, text) in [
                (periphgen::HEADER_FILE_NAME, artifact.declarations()),
                (periphgen::SOURCE_FILE_NAME, artifact.implementation()),
            ] {
                let path = dir.join(name);
                fs::write(&path, text)?;
                info!("Wrote {}", path.display());
            }
        }
        None => {
            println!("// {}", periphgen::HEADER_FILE_NAME);
            print!("{}", artifact.declarations());
            println!();
            println!("// {}", periphgen::SOURCE_FILE_NAME);
            print!("{}", artifact.implementation());
        }
    }
    Ok(())
}
