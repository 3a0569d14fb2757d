use clap::Parser;
use color_print::cformat;
use lamport_mutex::{log, snapshot::SnapshotDocument, validate};
use std::{fs, path::PathBuf, process};

/// Checks every snapshot document in a directory for consistency.
#[derive(Parser)]
#[command(name = "snapshot-validate")]
struct Args {
    #[arg(default_value = "snapshot")]
    dir: PathBuf,
}

fn main() {
    let args = Args::parse();
    log::init("info");

    let entries = match fs::read_dir(&args.dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::error(&format!("Couldn't read {}: {e}", args.dir.display()));
            process::exit(2);
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        log::error(&format!("No .json files in {}", args.dir.display()));
        process::exit(2);
    }

    let (mut ok, mut failed) = (0, 0);
    for path in files {
        let name = path.display();
        let document = match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|json| SnapshotDocument::from_json(&json).map_err(|e| e.to_string()))
        {
            Ok(document) => document,
            Err(e) => {
                log::warn(&format!("Skipping {name}: {e}"));
                continue;
            }
        };

        let violations = validate::check(&document);
        if violations.is_empty() {
            ok += 1;
            log::info(&cformat!(
                "<green>OK</green>: {name} N={}",
                document.snapshot.len()
            ));
        } else {
            failed += 1;
            log::error(&cformat!(
                "<red>ERROR</red>: {name} N={}",
                document.snapshot.len()
            ));
            for violation in violations {
                log::error(&format!("   {violation}"));
            }
        }
    }

    log::info(&format!("Summary: {ok} OK and {failed} with problems"));
    process::exit(if failed > 0 { 1 } else { 0 });
}
