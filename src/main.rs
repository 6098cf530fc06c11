mod cli;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use clap::Parser;
use cli::{Cli, Commands, SanitizerCommand, SourceCommand};
use survey_linker::blob::{Blob, CSV_DATA_MEMBER, JSON_DATA_MEMBER, SCHEMA_MEMBER};
use survey_linker::error::Error;
use survey_linker::output;
use survey_linker::pipeline;
use survey_linker::report::TableErrorReport;
use survey_linker::sanitizer::{LookupSanitizer, SanitizerStore};
use survey_linker::table::{SanitizedColumnId, UnsanitizedColumnId};
use survey_linker::types::{Result, Settings};
use survey_linker::unsanitized::SourceType;

fn init_logging(filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .target(env_logger::Target::Stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_filter());

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings();

    match cli.command {
        Commands::Source { command } => run_source(&settings, command),
        Commands::Sanitizer { command } => run_sanitizer(&settings, command),
        Commands::Sanitize { names, stdout } => {
            let report = pipeline::sanitize_sources(&settings, &names)?;
            write_report(&settings, "sanitize", &report, stdout)
        }
        Commands::Link { stdout } => {
            let report = pipeline::link_study(&settings)?;
            write_report(&settings, "link", &report, stdout)
        }
    }
}

fn write_report(
    settings: &Settings,
    stage: &str,
    report: &TableErrorReport,
    stdout: bool,
) -> Result<()> {
    let path = settings.report_dir.join(format!("{}.json", stage));
    output::write_json_file(report, &path)?;
    if stdout {
        output::write_json_stdout(report)?;
    }
    eprintln!(
        "{}: {} errors reported, written to {}",
        stage,
        report.len(),
        path.display()
    );
    Ok(())
}

fn read_payload(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(Error::NotFound(format!("file {}", path.display())));
    }
    Ok(fs::read(path)?)
}

fn run_source(settings: &Settings, command: SourceCommand) -> Result<()> {
    match command {
        SourceCommand::Add {
            name,
            kind,
            data,
            schema,
            remote_id,
        } => {
            let source_type = SourceType::from(kind);
            let mut files = BTreeMap::new();
            match source_type {
                SourceType::Csv => {
                    files.insert(CSV_DATA_MEMBER.to_string(), read_payload(&data)?);
                }
                SourceType::Qualtrics => {
                    let schema = schema.ok_or_else(|| {
                        Error::InvalidInput("qualtrics sources need --schema".to_string())
                    })?;
                    files.insert(SCHEMA_MEMBER.to_string(), read_payload(&schema)?);
                    files.insert(JSON_DATA_MEMBER.to_string(), read_payload(&data)?);
                }
            }
            let remote_id = remote_id.unwrap_or_else(|| name.clone());
            let blob = Blob::new(source_type, &remote_id, files)?;
            let path = pipeline::add_source(settings, &name, &blob)?;
            eprintln!(
                "Source '{}' ({} columns) written to: {}",
                name,
                blob.info.columns.len(),
                path.display()
            );
        }
        SourceCommand::Rm { name } => pipeline::remove_source(settings, &name)?,
        SourceCommand::List => {
            for name in pipeline::list_sources(settings)? {
                let blob = Blob::read_tar_gz(&settings.source_path(&name))?;
                println!(
                    "{}\t{}\t{}\t{}",
                    name,
                    blob.info.source.source_type.as_str(),
                    blob.info.source.title,
                    blob.info.fetch_date.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }
    Ok(())
}

fn run_sanitizer(settings: &Settings, command: SanitizerCommand) -> Result<()> {
    let store = SanitizerStore::new(&settings.sanitizer_dir);
    match command {
        SanitizerCommand::List { instrument } => {
            let instruments = match instrument {
                Some(instrument) => vec![instrument],
                None => store.instruments()?,
            };
            for instrument in instruments {
                for name in store.list(&instrument)? {
                    let sanitizer = store.load_lookup(&instrument, &name)?;
                    println!("{}\t{}\t{} rows", instrument, name, sanitizer.len());
                }
            }
        }
        SanitizerCommand::Add {
            instrument,
            name,
            keys,
            outputs,
        } => {
            if store.lookup_path(&instrument, &name).exists() {
                return Err(Error::InvalidSanitizer(format!(
                    "sanitizer '{}' already exists for '{}'",
                    name, instrument
                )));
            }
            let table = pipeline::load_source(settings, &instrument)?;
            let sanitizer = LookupSanitizer::template(
                &name,
                keys.into_iter().map(UnsanitizedColumnId::new).collect(),
                outputs.into_iter().map(SanitizedColumnId::new).collect(),
                &table,
            )?;
            store.save_lookup(&instrument, &sanitizer)?;
            eprintln!("Sanitizer '{}' created with {} rows", name, sanitizer.len());
        }
        SanitizerCommand::Update { instrument, name } => {
            let table = pipeline::load_source(settings, &instrument)?;
            let names = match name {
                Some(name) => vec![name],
                None => store.list(&instrument)?,
            };
            for name in names {
                let mut sanitizer = store.load_lookup(&instrument, &name)?;
                let added = sanitizer.extend_from_table(&table)?;
                store.save_lookup(&instrument, &sanitizer)?;
                eprintln!("Sanitizer '{}': {} rows added", name, added);
            }
        }
    }
    Ok(())
}
