// CLI binary — exiting on unrecoverable errors is standard for CLI tools.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;

use aka_script::config::{self, ScriptConfig};
use aka_script::dsl::compile_corpus;
use aka_script::dsl::error::CompileError;
use aka_script::source::{DirectorySource, ResourceId, SourceFile, SourceProvider};
use aka_script::value::codec::{self, Document};
use aka_script::value::Value;
use aka_script::{BuiltinRegistry, ScriptManager};

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "akac", about = "Event-script compiler and tools", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (JSON). Defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log compiler and loader activity
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every script under a pack directory and report diagnostics
    Check { dir: PathBuf },
    /// Compile a pack and invoke one schema (by name or namespace:path)
    Run {
        dir: PathBuf,
        schema: String,
        /// Arguments; numbers are passed as numbers, anything else as strings
        args: Vec<String>,
    },
    /// List the built-in operations and their signatures
    Ops,
    /// Print a persisted document
    DocDump { file: PathBuf },
    /// Encode a JSON object as a persisted document
    DocPack { input: PathBuf, output: PathBuf },
    /// Print the JSON schema of the config file
    Schema,
}

// ── Helpers ──────────────────────────────────────────────────────

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    process::exit(1);
}

fn load_sources(dir: &Path, config: &ScriptConfig) -> Vec<SourceFile> {
    DirectorySource::new(dir, config)
        .load()
        .unwrap_or_else(|e| fail(e))
}

fn report_compile_error(err: &CompileError, files: &[SourceFile]) {
    let text = err
        .source_id
        .as_deref()
        .and_then(|id| files.iter().find(|f| f.id.to_string() == id))
        .map(|f| f.text.as_str());
    match text {
        Some(text) => eprintln!("{}", err.format_with_source(text)),
        None => eprintln!("{err}"),
    }
}

fn parse_arg(raw: &str) -> Value {
    raw.parse::<f64>()
        .map_or_else(|_| Value::string(raw), Value::Number)
}

fn json_to_value(json: &serde_json::Value) -> Result<Value, String> {
    Ok(match json {
        serde_json::Value::Null => return Err("null has no script value".to_string()),
        serde_json::Value::Bool(b) => Value::bool(*b),
        serde_json::Value::Number(n) => {
            Value::Number(n.as_f64().ok_or_else(|| format!("number {n} out of range"))?)
        }
        serde_json::Value::String(s) => Value::string(s.as_str()),
        serde_json::Value::Array(items) => Value::list(
            items
                .iter()
                .map(json_to_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        serde_json::Value::Object(map) => {
            let dict = aka_script::value::DictRef::new();
            for (k, v) in map {
                dict.insert(Value::string(k.as_str()), json_to_value(v)?)
                    .map_err(|e| e.to_string())?;
            }
            Value::Dict(dict)
        }
    })
}

// ── Commands ─────────────────────────────────────────────────────

fn cmd_check(dir: &Path, config: &ScriptConfig) {
    let files = load_sources(dir, config);
    let builtins = BuiltinRegistry::standard();
    match compile_corpus(&files, &builtins, config.limits()) {
        Ok(module) => {
            let mut names: Vec<&str> = module.names().collect();
            names.sort_unstable();
            for name in &names {
                println!("  {name}");
            }
            println!("ok: {} schemas from {} files", names.len(), files.len());
        }
        Err(e) => {
            report_compile_error(&e, &files);
            process::exit(1);
        }
    }
}

async fn cmd_run(dir: PathBuf, schema: &str, args: &[String], config: ScriptConfig) {
    let provider = Arc::new(DirectorySource::new(dir, &config));
    let manager = ScriptManager::new(BuiltinRegistry::standard(), config);
    if let Err(e) = manager.reload(provider.clone()).await {
        if let aka_script::manager::ReloadError::Compile(err) = &e {
            if let Ok(files) = provider.load() {
                report_compile_error(err, &files);
                process::exit(1);
            }
        }
        fail(e);
    }

    let callable = match schema.parse::<ResourceId>() {
        Ok(id) => manager.function_by_resource(&id),
        Err(_) => manager.function(schema),
    }
    .unwrap_or_else(|| fail(aka_script::Error::UnknownSchema(schema.to_string())));

    let args: Vec<Value> = args.iter().map(|a| parse_arg(a)).collect();
    match callable.invoke(&args) {
        Ok(Some(value)) => println!("{value}"),
        Ok(None) => println!("(void)"),
        Err(e) => fail(e),
    }
}

fn cmd_ops() {
    let builtins = BuiltinRegistry::standard();
    let mut category = "";
    for op in builtins.iter() {
        if op.category != category {
            category = op.category.as_str();
            println!("{category}:");
        }
        println!("  {:<40} {}", op.signature(), op.description);
    }
}

fn cmd_doc_dump(file: &Path) {
    let bytes = std::fs::read(file).unwrap_or_else(|e| fail(e));
    let doc = codec::decode_document(&bytes).unwrap_or_else(|e| fail(e));
    for (key, value) in &doc {
        println!("{key} = {value}");
    }
}

fn cmd_doc_pack(input: &Path, output: &Path) {
    let text = std::fs::read_to_string(input).unwrap_or_else(|e| fail(e));
    let json: serde_json::Value = serde_json::from_str(&text).unwrap_or_else(|e| fail(e));
    let serde_json::Value::Object(map) = json else {
        fail("document input must be a JSON object");
    };
    let mut doc = Document::new();
    for (key, value) in &map {
        let value = json_to_value(value).unwrap_or_else(|e| fail(format!("{key}: {e}")));
        doc.insert(key.clone(), value);
    }
    let bytes = codec::encode_document(&doc).unwrap_or_else(|e| fail(e));
    std::fs::write(output, &bytes).unwrap_or_else(|e| fail(e));
    eprintln!("wrote {} entries ({} bytes)", doc.len(), bytes.len());
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => config::load_config(path).unwrap_or_else(|e| fail(e)),
        None => ScriptConfig::default(),
    };

    match cli.command {
        Commands::Check { dir } => cmd_check(&dir, &config),
        Commands::Run { dir, schema, args } => cmd_run(dir, &schema, &args, config).await,
        Commands::Ops => cmd_ops(),
        Commands::DocDump { file } => cmd_doc_dump(&file),
        Commands::DocPack { input, output } => cmd_doc_pack(&input, &output),
        Commands::Schema => match config::config_schema() {
            Ok(schema) => println!("{schema}"),
            Err(e) => fail(e),
        },
    }
}
