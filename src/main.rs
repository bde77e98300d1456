mod child;
mod cli;
mod error;
mod formatter;
mod job_control;
mod parser;
mod probe;
mod redirect;
mod router;
mod status;
mod supervisor;

use std::fs::File;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser as _;

use cli::Cli;
use error::MultiplexError;
use formatter::Formatter;
use parser::CommandSpec;
use supervisor::Supervisor;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let specs = match parse_all(&cli.commands) {
        Ok(specs) => specs,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    if cli.parse_only {
        print_parsed(&specs);
        return Ok(());
    }

    let mode = cli
        .timestamp_mode()
        .map_err(|msg| MultiplexError::Io(io::Error::new(io::ErrorKind::InvalidInput, msg)))?;
    let sink: Box<dyn Write + Send> = if cli.output == "-" {
        Box::new(io::stdout())
    } else {
        Box::new(File::create(&cli.output)?)
    };
    let formatter = Arc::new(Formatter::new(sink, mode));

    let supervisor = Supervisor::launch_batch(specs, formatter);
    supervisor.install_signal_handler()?;

    if cli.timeout > 0.0 {
        std::thread::sleep(Duration::from_secs_f64(cli.timeout));
        if !supervisor.terminate(true, Duration::from_secs(5)) {
            supervisor.terminate(false, Duration::from_secs(2));
        }
        supervisor.join(Some(Duration::from_secs(2)));
    } else {
        supervisor.join(None);
    }

    Ok(())
}

fn parse_all(commands: &[String]) -> Result<Vec<CommandSpec>, MultiplexError> {
    commands
        .iter()
        .map(|raw| parser::parse(raw).map_err(MultiplexError::from))
        .collect()
}

fn print_parsed(specs: &[CommandSpec]) {
    for spec in specs {
        println!("{spec:?}");
    }
}
