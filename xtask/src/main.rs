use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use jsonschema::JSONSchema;

const CATALOG_GLOBS: &[&str] = &[
    "tracon_core/src/data/sim_configurations.json",
    "integration_tests/tests/fixtures/*.json",
];

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("validate-configs") => validate_configs(args.collect()),
        Some("schema") => write_schema(args.next()),
        Some("ci") => ci(),
        Some("help") | None => {
            print_usage();
            Ok(())
        }
        Some(cmd) => {
            eprintln!("Unknown xtask '{cmd}'.");
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("Usage: cargo xtask validate-configs [FILE...]");
    eprintln!("       cargo xtask schema [OUTPUT]");
    eprintln!("       cargo xtask ci");
    eprintln!("       cargo xtask help");
}

fn ci() -> Result<(), Box<dyn Error>> {
    validate_configs(Vec::new())?;
    let status = Command::new("cargo")
        .args(["test", "--workspace", "--locked"])
        .status()?;
    if !status.success() {
        return Err("workspace tests failed".into());
    }
    Ok(())
}

fn write_schema(output: Option<String>) -> Result<(), Box<dyn Error>> {
    let schema = serde_json::to_string_pretty(&tracon_schema::catalog_schema())?;
    match output {
        Some(path) => {
            fs::write(&path, schema)?;
            println!("Wrote catalog schema to {path}");
        }
        None => println!("{schema}"),
    }
    Ok(())
}

fn validate_configs(explicit: Vec<String>) -> Result<(), Box<dyn Error>> {
    let files = if explicit.is_empty() {
        catalog_files()?
    } else {
        explicit.into_iter().map(PathBuf::from).collect()
    };
    if files.is_empty() {
        return Err("no catalog files found".into());
    }

    let schema = serde_json::to_value(tracon_schema::catalog_schema())?;
    let compiled = JSONSchema::compile(&schema)
        .map_err(|err| format!("catalog schema does not compile: {err}"))?;

    let mut failures = 0usize;
    for path in &files {
        match validate_file(&compiled, path) {
            Ok(count) => println!("ok   {} ({count} configurations)", path.display()),
            Err(problems) => {
                failures += 1;
                println!("FAIL {}", path.display());
                for problem in problems {
                    println!("     {problem}");
                }
            }
        }
    }

    if failures > 0 {
        return Err(format!("{failures} of {} catalog files invalid", files.len()).into());
    }
    Ok(())
}

fn catalog_files() -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut files = Vec::new();
    for pattern in CATALOG_GLOBS {
        for entry in glob::glob(pattern)? {
            files.push(entry?);
        }
    }
    files.sort();
    Ok(files)
}

/// Checks one file against the schema first, then against the server's own
/// catalog rules.
fn validate_file(schema: &JSONSchema, path: &Path) -> Result<usize, Vec<String>> {
    let text = fs::read_to_string(path).map_err(|err| vec![err.to_string()])?;
    let instance: serde_json::Value =
        serde_json::from_str(&text).map_err(|err| vec![format!("not JSON: {err}")])?;

    if let Err(errors) = schema.validate(&instance) {
        return Err(errors
            .map(|err| format!("{}: {}", err.instance_path, err))
            .collect());
    }

    tracon_core::catalog_from_json_str(&text)
        .map(|catalog| catalog.len())
        .map_err(|err| vec![err.to_string()])
}
