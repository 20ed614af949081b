//! A simple CLI tool for auditing an election offline.
//! This runs the same reconciliation as the server, and reads the dumps
//! produced by `GET /admin/dump`.

use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;

use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;

use evote_backend::audit::{audit, AuditReport, LedgerDump};

const PROGRAM_NAME: &str = "evote-audit";

const ABOUT_TEXT: &str = "Check that the tallies, vote ledger and voter registry of an election agree.

EXIT CODES:
     0: Audit passed.
   255: Ran successfully, but the audit found inconsistencies.
 Other: Error.";

const DUMP_PATH: &str = "DUMP_PATH";

const DUMP_PATH_HELP: &str = "The path to a JSON dump of the election,\n\
as returned by `GET /admin/dump`";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME).about(ABOUT_TEXT).arg(
        Arg::new(DUMP_PATH)
            .help(DUMP_PATH_HELP)
            .action(ArgAction::Set)
            .required(true),
    )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode the JSON dump.
    Format(String),
    /// The audit found inconsistencies.
    Inconsistent(AuditReport),
}

/// The tally of a single candidate, for display.
#[derive(Debug, Eq, PartialEq)]
struct FriendlyResults {
    pub candidate_name: String,
    pub tally: u64,
}

impl Display for FriendlyResults {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} vote{}",
            self.candidate_name,
            self.tally,
            if self.tally != 1 { "s" } else { "" }
        )
    }
}

/// Run the audit.
fn run_audit(path: &str) -> Result<Vec<FriendlyResults>, Error> {
    // Load the file.
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    let dump: LedgerDump =
        serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))?;

    let report = audit(&dump);
    if !report.is_consistent() {
        return Err(Error::Inconsistent(report));
    }

    // Ordered by tally, then name.
    let mut results = dump
        .candidates
        .into_iter()
        .map(|candidate| FriendlyResults {
            candidate_name: candidate.spec.name,
            tally: candidate.vote_count,
        })
        .collect::<Vec<_>>();
    results.sort_unstable_by(|a, b| a.candidate_name.cmp(&b.candidate_name));
    results.sort_by(|a, b| b.tally.cmp(&a.tally));

    Ok(results)
}

/// Run the audit, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let path: &String = args.get_one(DUMP_PATH).unwrap(); // Required argument is guaranteed to be present.
    match run_audit(path) {
        Ok(friendly_results) => {
            println!("Audit passed.");
            for result in friendly_results {
                println!("{}", result);
            }
            0
        }
        Err(Error::IO(msg)) => {
            println!("IO error: {}", msg);
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid JSON: {}", msg);
            1
        }
        Err(Error::Inconsistent(report)) => {
            println!(
                "Audit failed: tallies sum to {} against {} ledger record{}.",
                report.total_tally,
                report.total_records,
                if report.total_records != 1 { "s" } else { "" }
            );
            for discrepancy in report.discrepancies {
                println!("  {}", discrepancy);
            }
            255
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
