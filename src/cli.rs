use std::env;
use std::process;

/// Options for the `sigdrain` demo binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Log file path (None for stdout)
    pub log_file: Option<String>,
    /// Number of worker threads
    pub workers: usize,
    /// Drain deadline in seconds; overrides the config file when set
    pub grace_seconds: Option<u64>,
    /// Upper bound for a simulated job, in milliseconds
    pub max_job_ms: u64,
    /// Optional JSON config file
    pub config_file: Option<String>,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            log_file: None,
            workers: 4,
            grace_seconds: None,
            max_job_ms: 2000,
            config_file: None,
        }
    }
}

/// What the command line asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(CliArgs),
    Help,
    Version,
}

/// Prints usage instructions for the program.
pub fn print_usage() {
    println!(
        "Usage: {} [-h] [-v] [-l logfile] [-w workers] [-g grace_seconds] [-j max_job_ms] [-c config_file]",
        crate::PROGRAM_NAME
    );
}

fn parse_number<T: std::str::FromStr>(
    value: Option<String>,
    what: &str,
) -> Result<T, String> {
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("{} must be a positive number", what)),
        None => Err(format!("Missing {} argument", what.to_lowercase())),
    }
}

/// Parses an argument list (without the program name)
///
/// # Errors
/// A message suitable for stderr when an option is unknown, lacks its value
/// or has a value that does not parse
pub fn parse_args_from<I>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" => return Ok(Command::Help),
            "-v" => return Ok(Command::Version),
            "-l" => {
                parsed.log_file = Some(
                    args.next()
                        .ok_or_else(|| "Missing log file argument".to_string())?,
                )
            }
            "-c" => {
                parsed.config_file = Some(
                    args.next()
                        .ok_or_else(|| "Missing config file argument".to_string())?,
                )
            }
            "-w" => {
                let workers: usize = parse_number(args.next(), "Worker count")?;
                if workers == 0 {
                    return Err("Worker count must be a positive number".to_string());
                }
                parsed.workers = workers;
            }
            "-g" => {
                parsed.grace_seconds = Some(parse_number(args.next(), "Grace seconds")?);
            }
            "-j" => {
                let max_job_ms: u64 = parse_number(args.next(), "Max job milliseconds")?;
                if max_job_ms == 0 {
                    return Err("Max job milliseconds must be a positive number".to_string());
                }
                parsed.max_job_ms = max_job_ms;
            }
            _ => return Err(format!("Unexpected argument: {}", arg)),
        }
    }

    Ok(Command::Run(parsed))
}

/// Parses the process command line
///
/// Prints usage and exits on `-h`, `-v` and invalid arguments.
pub fn parse_args() -> CliArgs {
    match parse_args_from(env::args().skip(1)) {
        Ok(Command::Run(args)) => args,
        Ok(Command::Help) => {
            print_usage();
            process::exit(0);
        }
        Ok(Command::Version) => {
            println!("{} version {}", crate::PROGRAM_NAME, crate::PROGRAM_VERSION);
            process::exit(0);
        }
        Err(message) => {
            eprintln!("Error: {}", message);
            print_usage();
            process::exit(1);
        }
    }
}
