//! Command-line argument parsing for the `opalc` driver.
//!
//! Hand-rolled over the raw argv iterator; the recognized surface is
//! small and stable.

use opal_ir::DriverConfig;

/// Parsed driver arguments.
#[derive(Debug, Clone, Default)]
pub struct DriverArgs {
    /// Error-policy knobs forwarded to the core sink.
    pub config: DriverConfig,
    /// Input files, in order.
    pub inputs: Vec<String>,
    /// Re-print every decoded entity (`--dump`).
    pub dump: bool,
    /// Run the built-in end-to-end pipeline demonstration (`--demo`).
    pub demo: bool,
    /// Show usage and exit (`-h` / `--help`).
    pub help: bool,
}

/// An argument the driver cannot act on.
#[derive(Debug, Clone)]
pub enum ArgError {
    UnknownFlag(String),
    BadValue { flag: &'static str, value: String },
}

impl std::fmt::Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgError::UnknownFlag(flag) => write!(f, "unknown flag '{}'", flag),
            ArgError::BadValue { flag, value } => {
                write!(f, "invalid value '{}' for '{}'", value, flag)
            }
        }
    }
}

impl std::error::Error for ArgError {}

/// Usage text.
pub const USAGE: &str = "usage: opalc [options] <input>...

options:
  -Werror           treat warnings as errors
  -Wfatal-errors    stop at the first error
  -fmax-errors=N    stop after N errors (0 = unlimited)
  --dump            re-print every decoded entity
  --demo            translate and lower a built-in sample method
  -h, --help        show this help";

/// Parse the argument list (without the program name).
pub fn parse_args(args: impl IntoIterator<Item = String>) -> Result<DriverArgs, ArgError> {
    let mut parsed = DriverArgs::default();

    for arg in args {
        match arg.as_str() {
            "-Werror" => parsed.config.warnings_as_errors = true,
            "-Wfatal-errors" => parsed.config.fatal_errors = true,
            "--dump" => parsed.dump = true,
            "--demo" => parsed.demo = true,
            "-h" | "--help" => parsed.help = true,
            _ => {
                if let Some(value) = arg.strip_prefix("-fmax-errors=") {
                    parsed.config.max_errors =
                        value.parse().map_err(|_| ArgError::BadValue {
                            flag: "-fmax-errors",
                            value: value.to_string(),
                        })?;
                } else if arg.starts_with('-') {
                    return Err(ArgError::UnknownFlag(arg));
                } else {
                    parsed.inputs.push(arg);
                }
            }
        }
    }

    Ok(parsed)
}
