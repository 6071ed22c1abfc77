use std::ffi::OsString;
use std::path::Path;

use clap::error::ErrorKind;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command, CommandFactory, FromArgMatches, Parser};
use tether::{CommandSuite, FLAGS, GovernorConfig, Probe, ResourceKind, parse_number};

#[derive(Parser, Debug)]
#[command(name = "tether-ctl")]
#[command(about = "Run a test suite under resource limits and a real-time watchdog", long_about = None)]
#[command(disable_help_flag = true, disable_version_flag = true, args_override_self = true)]
#[command(after_help = "EXAMPLES:
    # Kill the suite (and everything it forked) after 30 seconds
    tether-ctl -r 30 -- ./run-tests

    # One CPU second, 64 descriptors, no core files
    tether-ctl -c 1 -o 64 -e 0 -- ./run-tests --death-tests

    # Check that the limits can be applied without running anything
    tether-ctl -0 -t 256 -m 0x10000000

    # Built-in death test: dies by SIGXCPU
    tether-ctl -c 1 --probe cpu
")]
pub struct Cli {
    /// Do not actually run any tests
    #[arg(short = '0', long = "dry-run")]
    pub dry_run: bool,

    /// Enable debug output
    #[arg(short = '!', long = "debug")]
    pub debug: bool,

    /// Print menu
    #[arg(short = '?', long = "help")]
    pub help: bool,

    /// Raise hard ceilings to the requested value instead of clamping to them
    #[arg(long)]
    pub force: bool,

    /// Run a built-in death test instead of a command
    #[arg(long = "probe", value_name = "NAME", conflicts_with = "command")]
    pub probes: Vec<Probe>,

    /// Suite to run, with its arguments (everything after it is passed through)
    #[arg(value_name = "COMMAND", trailing_var_arg = true)]
    pub command: Vec<String>,
}

/// The suite an invocation asked for
#[derive(Debug)]
pub enum SuiteChoice {
    Command(CommandSuite),
    Probes(Vec<Probe>),
    /// Dry run without a suite
    Nothing,
}

/// A fully parsed run request
#[derive(Debug)]
pub struct Plan {
    pub program: String,
    pub config: GovernorConfig,
    pub suite: SuiteChoice,
}

#[derive(Debug)]
pub enum Invocation {
    Help,
    Run(Plan),
}

/// The complete command: derived general flags plus one value flag and one
/// unlimited flag per row of the flag table.
pub fn command() -> Command {
    let mut cmd = Cli::command();
    for spec in &FLAGS {
        cmd = cmd
            .arg(
                Arg::new(spec.long)
                    .short(spec.set)
                    .short_aliases(spec.set_aliases.iter().copied())
                    .long(spec.long)
                    .value_name(spec.value_name)
                    .help(format!("Set the {} to {}", spec.help, spec.value_name))
                    .action(ArgAction::Set)
                    .value_parser(parse_limit)
                    .overrides_with(spec.long_unlimited),
            )
            .arg(
                Arg::new(spec.long_unlimited)
                    .short(spec.unlimited)
                    .short_aliases(spec.unlimited_aliases.iter().copied())
                    .long(spec.long_unlimited)
                    .help(format!("Set the {} to unlimited", spec.help))
                    .action(ArgAction::SetTrue)
                    .overrides_with(spec.long),
            );
    }
    cmd
}

fn parse_limit(text: &str) -> Result<u64, tether::TetherError> {
    parse_number(text)
}

/// Usage menu, as printed for `-?`
pub fn usage() -> String {
    command().render_help().to_string()
}

/// Parse `args` (including the program name) into an invocation.
pub fn parse<I, T>(args: I) -> Result<Invocation, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let program = args
        .first()
        .and_then(|arg0| Path::new(arg0).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tether-ctl".to_string());

    let mut cmd = command();
    let matches = cmd.try_get_matches_from_mut(args)?;
    let cli = Cli::from_arg_matches(&matches)?;

    if cli.help {
        return Ok(Invocation::Help);
    }

    let mut builder = GovernorConfig::builder();
    for option in options_in_order(&matches) {
        builder = match option {
            Given::Limit(kind, Some(value)) => builder.limit(kind, value),
            Given::Limit(kind, None) => builder.unlimited(kind),
            Given::Debug => builder.debug(true),
            Given::DryRun => builder.dry_run(true),
        };
    }
    let config = builder
        .force(cli.force)
        .build()
        .map_err(|e| cmd.error(ErrorKind::ValueValidation, e))?;

    let suite = if !cli.probes.is_empty() {
        SuiteChoice::Probes(cli.probes)
    } else if let Some((name, rest)) = cli.command.split_first() {
        SuiteChoice::Command(CommandSuite::new(name.as_str()).args(rest.iter().cloned()))
    } else if config.dry_run {
        SuiteChoice::Nothing
    } else {
        return Err(cmd.error(
            ErrorKind::MissingRequiredArgument,
            "a COMMAND or --probe is required unless -0 is given",
        ));
    };

    Ok(Invocation::Run(Plan {
        program,
        config,
        suite,
    }))
}

/// An option that feeds the configuration, as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Given {
    /// `None` stands for the unlimited form
    Limit(ResourceKind, Option<u64>),
    Debug,
    DryRun,
}

/// Limit flags, `-!` and `-0`, in the order they appeared.
fn options_in_order(matches: &ArgMatches) -> Vec<Given> {
    let mut found = Vec::new();
    for spec in &FLAGS {
        if let Some(index) = given(matches, spec.long)
            && let Some(&value) = matches.get_one::<u64>(spec.long)
        {
            found.push((index, Given::Limit(spec.kind, Some(value))));
        }
        if let Some(index) = given(matches, spec.long_unlimited)
            && matches.get_flag(spec.long_unlimited)
        {
            found.push((index, Given::Limit(spec.kind, None)));
        }
    }
    for (id, option) in [("debug", Given::Debug), ("dry_run", Given::DryRun)] {
        if let Some(index) = given(matches, id)
            && matches.get_flag(id)
        {
            found.push((index, option));
        }
    }
    found.sort_by_key(|&(index, _)| index);
    found.into_iter().map(|(_, option)| option).collect()
}

fn given(matches: &ArgMatches, id: &str) -> Option<usize> {
    if matches.value_source(id) != Some(ValueSource::CommandLine) {
        return None;
    }
    matches.index_of(id)
}
