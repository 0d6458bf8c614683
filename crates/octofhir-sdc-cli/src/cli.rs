use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "octofhir-sdc")]
#[command(about = "OctoFHIR SDC: pre-populate questionnaires from patient context")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML config file (defaults to ./octofhir-sdc.toml when present)
    #[arg(short, long, global = true, env = "OCTOFHIR_SDC_CONFIG")]
    pub config: Option<String>,

    /// Log level filter (overrides config; RUST_LOG wins over both)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Summary,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Populate a Questionnaire into a QuestionnaireResponse
    Populate(PopulateArgs),
    /// Show the expressions population would evaluate
    Index(IndexArgs),
    /// Print the effective configuration
    Config,
}

#[derive(clap::Args)]
pub struct PopulateArgs {
    /// Questionnaire JSON file
    #[arg(short, long)]
    pub questionnaire: String,

    /// JSON object of launch bindings, e.g. {"patient": {...}, "user": {...}}
    #[arg(long)]
    pub context: Option<String>,

    /// JSON object mapping expression text to recorded results
    #[arg(long)]
    pub results: Option<String>,

    /// Terminology server base URL (enables remote expansion)
    #[arg(long, env = "OCTOFHIR_SDC_TERMINOLOGY_SERVER")]
    pub terminology_server: Option<String>,

    /// Disable remote value set expansion
    #[arg(long, conflicts_with = "terminology_server")]
    pub no_terminology: bool,

    /// Population budget in milliseconds (overrides config)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Exit with a non-zero code when population reports issues
    #[arg(long)]
    pub strict: bool,
}

#[derive(clap::Args)]
pub struct IndexArgs {
    /// Questionnaire JSON file
    #[arg(short, long)]
    pub questionnaire: String,
}
