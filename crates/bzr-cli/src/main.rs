//! bzr: Bugzilla report compiler
//!
//! Commands: compile, report, params

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};

use bzr_connector::{FieldIdCache, PlainTables, SqliteConnector};
use bzr_core::{ConfigFile, ParameterSpec};
use bzr_query::{format_results, OutputFormat, Report};

#[derive(Parser)]
#[command(name = "bzr")]
#[command(version)]
#[command(about = "Compile Bugzilla report parameters into SQL and render the results")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "bzr.toml")]
    config: PathBuf,

    /// Increase log output on stderr (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Print the SQL and search URL for a set of parameters
    #[command(alias = "c")]
    Compile {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
        /// Report parameters as name=value
        params: Vec<String>,
    },
    /// Run a report against the bug database
    #[command(alias = "r")]
    Report {
        /// SQLite database, overriding the configuration
        #[arg(long)]
        database: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value_t = Output::Table)]
        output: Output,
        /// Report parameters as name=value
        params: Vec<String>,
    },
    /// List the supported parameters
    Params,
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    Table,
    Markdown,
    Json,
}

impl From<Output> for OutputFormat {
    fn from(output: Output) -> Self {
        match output {
            Output::Table => Self::Table,
            Output::Markdown => Self::Markdown,
            Output::Json => Self::Json,
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let file = ConfigFile::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Compile { json, params } => {
            let mut report = Report::from_args(&file, params.iter().map(String::as_str));
            let query = report.compile(&PlainTables);
            let diagnostics = report.diagnostics().to_vec();
            if json {
                let value = serde_json::json!({
                    "sql": query.sql,
                    "params": query.params,
                    "display_sql": query.display_sql(),
                    "search_url": query.search_url,
                    "columns": query.columns,
                    "diagnostics": diagnostics,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", query.display_sql());
                println!("{}", query.search_url);
                for diagnostic in &diagnostics {
                    eprintln!("warning: {diagnostic}");
                }
            }
        }
        Commands::Report {
            database,
            output,
            params,
        } => {
            let report = Report::from_args(&file, params.iter().map(String::as_str));
            let Some(path) = database.or_else(|| report.config().database.clone()) else {
                bail!(
                    "no database configured; pass --database or set `database` in {}",
                    cli.config.display()
                );
            };
            let connector = SqliteConnector::new(path, report.config().schema.clone());
            let cache = FieldIdCache::new();
            let result = report.run(&connector, &cache)?;
            print!("{}", format_results(&result, output.into()));
        }
        Commands::Params => {
            let spec = ParameterSpec::bugzilla();
            for (name, param_type) in spec.parameters() {
                let param_type = param_type.as_str();
                match spec.default_value(name) {
                    Some(default) => println!("{name:<20} {param_type:<16} {default}"),
                    None => println!("{name:<20} {param_type}"),
                }
            }
        }
    }

    Ok(())
}
