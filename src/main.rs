//! ontoverify CLI - command-line interface
//!
//! Commands:
//!   verify   - Verify a text file against an ontology
//!   list     - List ontologies available in a directory
//!   show     - Print one ontology's declarations and constraints
//!   health   - Report the crate version and solver backend

use ontoverify::*;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return ExitCode::from(1);
    }

    let result = match args[1].as_str() {
        "verify" => cmd_verify(&args[2..]),
        "list" => cmd_list(&args[2..]),
        "show" => cmd_show(&args[2..]),
        "health" => cmd_health(),
        "version" | "--version" | "-v" => {
            println!("ontoverify {VERSION}");
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_usage();
            Err("unknown command".into())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

fn print_usage() {
    println!(
        r#"
ontoverify - verify free-form text against declarative logical constraints

USAGE:
    ontoverify <COMMAND> [OPTIONS]

COMMANDS:
    verify <ontology_dir> <name> <text_file>   Verify a text file against an ontology
    list <ontology_dir>                        List loadable ontologies
    show <ontology_dir> <name>                 Print one ontology's declarations
    health                                     Report crate version and solver backend
    version                                    Print the version
    help                                       Print this message
"#
    );
}

fn cmd_verify(args: &[String]) -> error::Result<()> {
    let (dir, name, text_path) = match args {
        [dir, name, text_path] => (dir, name, text_path),
        _ => return Err("usage: ontoverify verify <ontology_dir> <name> <text_file>".into()),
    };

    let (registry, issues) = registry::Registry::load(dir)?;
    for issue in &issues {
        eprintln!("warning: {} failed to load: {}", issue.path.display(), issue.reason);
    }

    let ontology = registry
        .get(name)
        .ok_or_else(|| error::Error::UnknownOntology(name.clone()))?;

    let text = fs::read_to_string(PathBuf::from(text_path))?;
    let report = verify::verify(&ontology, &text);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_list(args: &[String]) -> error::Result<()> {
    let dir = args.first().ok_or("usage: ontoverify list <ontology_dir>")?;
    let (registry, issues) = registry::Registry::load(dir)?;
    for summary in registry.list() {
        println!(
            "{}\t{}\t{} constraints\t{}\t{}",
            summary.name,
            summary.version.unwrap_or_default(),
            summary.constraints,
            summary.description.unwrap_or_default(),
            summary.content_hash,
        );
    }
    for issue in &issues {
        eprintln!("warning: {} failed to load: {}", issue.path.display(), issue.reason);
    }
    Ok(())
}

fn cmd_show(args: &[String]) -> error::Result<()> {
    let (dir, name) = match args {
        [dir, name] => (dir, name),
        _ => return Err("usage: ontoverify show <ontology_dir> <name>".into()),
    };
    let (registry, _) = registry::Registry::load(dir)?;
    registry
        .get(name)
        .ok_or_else(|| error::Error::UnknownOntology(name.clone()))?;
    match registry.get_raw(name) {
        Some(raw) => println!("{raw}"),
        None => unreachable!("get_raw must be present whenever get succeeded"),
    }
    Ok(())
}

fn cmd_health() -> error::Result<()> {
    println!(
        "{}",
        serde_json::json!({
            "status": "ok",
            "version": VERSION,
            "solver": verify::SOLVER_BACKEND,
        })
    );
    Ok(())
}
