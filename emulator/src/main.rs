mod script;
mod session;
mod sim;

use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::process;

use script::parse_scenario;
use session::EmulatorSession;

const USAGE: &str = "Usage: ranging-emulator [--scenario <file>]  (reads the script from stdin when omitted or `-`)";

fn main() -> io::Result<()> {
    let source = scenario_path()
        .and_then(|path| read_script(path.as_deref()))
        .unwrap_or_else(|err| {
            eprintln!("{err}");
            eprintln!("{USAGE}");
            process::exit(2);
        });

    let scenario = parse_scenario(&source).unwrap_or_else(|err| {
        eprintln!("scenario: {err}");
        process::exit(2);
    });

    let stdout = io::stdout();
    let mut writer = stdout.lock();
    writeln!(writer, "Channel Sounding ranging emulator")?;
    let report = EmulatorSession::new(scenario).run(&mut writer)?;
    writeln!(
        writer,
        "== done: {} cycles, {} estimates, {} retries",
        report.outcomes.len(),
        report.stats.estimates,
        report.stats.total_retries()
    )?;

    if report.error.is_some() {
        process::exit(1);
    }
    Ok(())
}

/// Returns the `--scenario` path, or `None` for stdin.
fn scenario_path() -> Result<Option<String>, String> {
    let mut args = env::args().skip(1);
    let Some(arg) = args.next() else {
        return Ok(None);
    };

    let path = if let Some(value) = arg.strip_prefix("--scenario=") {
        value.to_string()
    } else if arg == "--scenario" {
        args.next()
            .ok_or_else(|| "Expected value after --scenario".to_string())?
    } else {
        return Err(format!("Unknown argument `{arg}`"));
    };

    if let Some(extra) = args.next() {
        return Err(format!("Unexpected argument `{extra}`"));
    }
    Ok((path != "-").then_some(path))
}

fn read_script(path: Option<&str>) -> Result<String, String> {
    match path {
        Some(path) => fs::read_to_string(path).map_err(|err| format!("{path}: {err}")),
        None => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .map_err(|err| format!("stdin: {err}"))?;
            Ok(source)
        }
    }
}
