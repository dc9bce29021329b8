//! relcontent Command-Line Client
//!
//! Builds content descriptors and records from a JSON fixture holding a
//! schema, a rule set and instance data.

mod error;
mod fixture;
mod formatter;

use clap::{Args as ClapArgs, Parser, Subcommand};
use error::CliError;
use fixture::Fixture;
use formatter::OutputFormat;
use relcontent_core::descriptor::{ContentFlags, DescriptorRequest};
use relcontent_core::{ContentEngine, EngineConfig, RecordsRequest};
use relcontent_proto::{InstanceKey, Value};
use std::path::PathBuf;
use tracing::debug;

/// relcontent Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "relcontent")]
#[command(version, about = "Inspect relcontent descriptors and records")]
pub struct Args {
    /// Fixture file with schema, rules, instances and links
    #[arg(short = 'f', long, global = true)]
    pub fixture: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build and print the content descriptor
    Descriptor(Selection),
    /// Build and print content records
    Records {
        #[command(flatten)]
        selection: Selection,

        /// Merge all records into one
        #[arg(long)]
        merge: bool,
    },
}

/// Which instances or types to build content for.
#[derive(ClapArgs, Debug)]
pub struct Selection {
    /// Instance keys (Class:id). Defaults to every fixture instance of the
    /// given types.
    #[arg(short = 'i', long = "instance")]
    pub instances: Vec<InstanceKey>,

    /// Root types, used when no instance is given
    #[arg(short = 't', long = "type")]
    pub types: Vec<String>,

    /// Rule set variables (name=value, value parsed as JSON when possible)
    #[arg(long = "var", value_parser = parse_variable)]
    pub variables: Vec<(String, Value)>,

    /// Build a descriptor without fields; records carry keys only
    #[arg(long)]
    pub keys_only: bool,
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relcontent=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let formatter = formatter::create_formatter(args.format);

    match run(&args) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string()));
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<String, CliError> {
    let path = args
        .fixture
        .as_ref()
        .ok_or_else(|| CliError::InvalidArgument("--fixture is required".into()))?;
    let fixture = Fixture::load(path)?;
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    execute(fixture, config, &args.command, args.format)
}

/// Run a command against a loaded fixture.
fn execute(fixture: Fixture, config: EngineConfig, command: &Command, format: OutputFormat) -> Result<String, CliError> {
    let store = fixture.store();
    let formatter = formatter::create_formatter(format);

    let selection = match command {
        Command::Descriptor(selection) => selection,
        Command::Records { selection, .. } => selection,
    };
    let instances = if selection.instances.is_empty() {
        fixture.instances_of(&selection.types)
    } else {
        selection.instances.clone()
    };
    debug!(instances = instances.len(), types = selection.types.len(), "selection resolved");

    let engine = ContentEngine::new(fixture.schema, fixture.rules, config)?;

    let mut request = if instances.is_empty() {
        if selection.types.is_empty() {
            return Err(CliError::InvalidArgument(
                "name at least one --instance or --type".into(),
            ));
        }
        DescriptorRequest::new(selection.types.iter().cloned())
    } else {
        DescriptorRequest::for_instances(&instances)
    };
    for (name, value) in &selection.variables {
        request = request.with_variable(name.clone(), value.clone());
    }
    if selection.keys_only {
        request = request.with_flags(ContentFlags::KEYS_ONLY);
    }
    let build = engine.descriptor(&request, Some(&store))?;

    match command {
        Command::Descriptor(_) => Ok(formatter.format_descriptor(&build)),
        Command::Records { merge, .. } => {
            let mut records = RecordsRequest::new(instances);
            if *merge {
                records = records.merged();
            }
            let set = engine.records(&build.descriptor, &store, &records)?;
            Ok(formatter.format_records(&build.descriptor, &set))
        }
    }
}

/// Parse a `name=value` variable binding.
fn parse_variable(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    if name.is_empty() {
        return Err(format!("missing variable name in '{}'", s));
    }
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw));
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixture::tests::SAMPLE;
    use pretty_assertions::assert_eq;

    fn selection(instances: &[&str], types: &[&str]) -> Selection {
        Selection {
            instances: instances.iter().map(|s| s.parse().unwrap()).collect(),
            types: types.iter().map(|s| s.to_string()).collect(),
            variables: Vec::new(),
            keys_only: false,
        }
    }

    #[test]
    fn test_parse_variable() {
        assert_eq!(parse_variable("mode=1").unwrap(), ("mode".into(), Value::Int64(1)));
        assert_eq!(parse_variable("flag=true").unwrap(), ("flag".into(), Value::Bool(true)));
        assert_eq!(parse_variable("name=abc").unwrap(), ("name".into(), Value::from("abc")));
        assert!(parse_variable("novalue").is_err());
        assert!(parse_variable("=1").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "relcontent",
            "records",
            "-f",
            "fixture.json",
            "-i",
            "Element:1",
            "-i",
            "Element:2",
            "--merge",
            "--format",
            "json",
        ]);
        assert_eq!(args.format, OutputFormat::Json);
        match args.command {
            Command::Records { selection, merge } => {
                assert!(merge);
                assert_eq!(selection.instances.len(), 2);
            }
            Command::Descriptor(_) => panic!("expected records command"),
        }
    }

    #[test]
    fn test_execute_descriptor_for_types() {
        let fixture = Fixture::parse(SAMPLE).unwrap();
        let command = Command::Descriptor(selection(&[], &["Element"]));
        let output = execute(fixture, EngineConfig::default(), &command, OutputFormat::Csv).unwrap();
        assert!(output.starts_with("name,label,kind"));
        assert!(output.contains("nested"));
    }

    #[test]
    fn test_execute_merged_records() {
        let fixture = Fixture::parse(SAMPLE).unwrap();
        let command = Command::Records {
            selection: selection(&["Element:1", "Element:2"], &[]),
            merge: true,
        };
        let output = execute(fixture, EngineConfig::default(), &command, OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        let records = parsed["records"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["primaryKeys"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_execute_keys_only_records() {
        let fixture = Fixture::parse(SAMPLE).unwrap();
        let mut selection = selection(&["Element:1"], &[]);
        selection.keys_only = true;
        let command = Command::Records { selection, merge: false };
        let output = execute(fixture, EngineConfig::default(), &command, OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        let records = parsed["records"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["primaryKeys"].as_array().map(Vec::len), Some(1));
        assert_eq!(records[0]["values"].as_object().map(|v| v.len()), Some(0));
    }

    #[test]
    fn test_execute_requires_selection() {
        let fixture = Fixture::parse(SAMPLE).unwrap();
        let command = Command::Descriptor(selection(&[], &[]));
        let err = execute(fixture, EngineConfig::default(), &command, OutputFormat::Table).unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }

    #[test]
    fn test_run_with_fixture_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let args = Args::parse_from(["relcontent", "descriptor", "-f", path.to_str().unwrap(), "-t", "Element"]);
        let output = run(&args).unwrap();
        assert!(output.contains("field(s)"));
    }
}
