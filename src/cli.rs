//! Command-line surface: one positional `COMMAND` spec per child, plus the
//! output/timeout/parse-only/timestamp options.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "multiplex", about = "Run several commands in parallel, merging their output")]
pub struct Cli {
    /// One command-spec string per child (see the grammar in parser.rs).
    #[arg(required = true)]
    pub commands: Vec<String>,

    /// Write the merged stream to PATH; `-` means stdout.
    #[arg(short = 'o', long = "output", default_value = "-")]
    pub output: String,

    /// After SEC seconds, run a graceful-then-join shutdown. 0 disables.
    #[arg(short = 't', long = "timeout", default_value_t = 0.0)]
    pub timeout: f64,

    /// Parse every spec, print its fields, and exit without launching anything.
    #[arg(short = 'p', long = "parse")]
    pub parse_only: bool,

    /// Enable the timestamp prefix. `absolute` (wall clock) is the default
    /// if the flag is given with no value; `relative` measures from process
    /// start.
    #[arg(long = "time", value_name = "relative|absolute", num_args = 0..=1, default_missing_value = "absolute")]
    pub time: Option<String>,
}

impl Cli {
    pub fn timestamp_mode(&self) -> Result<crate::formatter::TimestampMode, String> {
        match self.time.as_deref() {
            None => Ok(crate::formatter::TimestampMode::Off),
            Some("absolute") => Ok(crate::formatter::TimestampMode::Absolute),
            Some("relative") => Ok(crate::formatter::TimestampMode::Relative),
            Some(other) => Err(format!("invalid --time value '{other}'")),
        }
    }
}
