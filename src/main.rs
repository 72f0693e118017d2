// main.rs: arg parsing and orchestration only.
// Filesystem and process work lives in the modules below.
mod config;
mod extract;
mod launch;
mod packages;
mod paths;

use std::io::Write;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};

use config::harness_config;
use extract::materialize;
use launch::{idle, kill_all, run_single_server};
use packages::{list_packages, prompt_newer, select_packages, Selection};
use paths::resolve_layout;

/// Unpack local ArangoDB tar.gz packages and launch them for manual testing.
#[derive(Debug, Parser)]
#[command(version, about, disable_version_flag = true)]
struct Args {
    /// Output the current version
    #[arg(short = 'v', long = "vers", action = ArgAction::Version)]
    vers: (),

    /// What to launch
    #[arg(value_enum)]
    command: HarnessCommand,

    /// Free-form environment label, only logged
    environment: Option<String>,

    /// Keep the tmp directory and skip decompressing the tar.gz files
    #[arg(short, long, value_name = "BOOL", default_value_t = false,
          action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    keep: bool,

    /// killall running arangodb and arangod instances before launching
    #[arg(short, long, value_name = "BOOL", default_value_t = false,
          action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    force: bool,

    /// Log debug output, including the starter's stdout and stderr
    #[arg(short, long, value_name = "BOOL", default_value_t = false,
          action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HarnessCommand {
    #[value(name = "singleServer")]
    SingleServer,
}

impl HarnessCommand {
    fn name(self) -> &'static str {
        match self {
            HarnessCommand::SingleServer => "singleServer",
        }
    }
}

/// Parse CLI args; any usage error exits with code 1 (help/version exit 0).
fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    }
}

fn init_logging(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| match record.level() {
            log::Level::Info => writeln!(buf, "[harness] {}", record.args()),
            level => writeln!(buf, "[harness] {}: {}", level, record.args()),
        })
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = parse_args();
    init_logging(args.debug);

    log::info!("command: {}", args.command.name());
    log::info!(
        "environment: {}",
        args.environment.as_deref().unwrap_or("no environment given")
    );

    let config = harness_config();
    let packages = list_packages(&config.package_dir)?;
    let packages = match select_packages(packages, prompt_newer)? {
        Selection::NoPackages => {
            log::info!(
                "no packages found in {} - exiting",
                config.package_dir.display()
            );
            return Ok(());
        }
        Selection::Unsupported(count) => {
            log::info!(
                "found {count} files in {}, more than two packages is not supported - exiting",
                config.package_dir.display()
            );
            return Ok(());
        }
        Selection::Chosen(packages) => packages,
    };
    match &packages.old {
        Some(old) => log::info!("selected {} as the newer and {old} as the older version", packages.new),
        None => log::info!("selected {} as the version to use", packages.new),
    }

    materialize(&config, &packages, args.keep)?;

    if args.force {
        kill_all();
    }

    let layout = resolve_layout(&config, packages);
    log::debug!("resolved layout: {layout:?}");
    log::info!(
        "using {} extracted from {}",
        layout.new.sub_dir,
        layout.packages.new
    );

    match args.command {
        HarnessCommand::SingleServer => run_single_server(&config, &layout, args.debug)?,
    }

    idle();
    Ok(())
}
