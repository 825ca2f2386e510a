use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::engine::DEFAULT_BASE_SEED;

#[derive(Parser, Debug)]
#[command(
    name = "citesim",
    version,
    about = "Citation-bias simulation over ranked, paginated search results"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Run(RunArgs),
    GenerateSettings(GenerateSettingsArgs),
    ImportCorpus(ImportCorpusArgs),
    FitNormalizer(FitNormalizerArgs),
    Probe(ProbeArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = ".cache/citesim/settings.json")]
    pub settings_path: PathBuf,

    #[arg(long)]
    pub queries_path: PathBuf,

    #[arg(long, default_value = ".cache/citesim/normalizer.json")]
    pub normalizer_path: PathBuf,

    #[arg(long, default_value = ".cache/citesim/corpus.sqlite")]
    pub corpus_db: PathBuf,

    #[arg(long, default_value = ".cache/citesim/experiment")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 2500)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 250)]
    pub candidates: usize,

    #[arg(long, default_value_t = DEFAULT_BASE_SEED)]
    pub base_seed: u64,

    #[arg(long)]
    pub max_batches: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateSettingsArgs {
    #[arg(long, default_value = ".cache/citesim/settings.json")]
    pub output_path: PathBuf,

    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ImportCorpusArgs {
    #[arg(long)]
    pub articles_path: PathBuf,

    #[arg(long, default_value = ".cache/citesim/corpus.sqlite")]
    pub corpus_db: PathBuf,

    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct FitNormalizerArgs {
    #[arg(long, default_value = ".cache/citesim/corpus.sqlite")]
    pub corpus_db: PathBuf,

    #[arg(long, default_value = ".cache/citesim/normalizer.json")]
    pub output_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    #[arg(long)]
    pub queries_path: PathBuf,

    #[arg(long)]
    pub query_id: u64,

    #[arg(long, default_value = ".cache/citesim/settings.json")]
    pub settings_path: PathBuf,

    #[arg(long, default_value = ".cache/citesim/normalizer.json")]
    pub normalizer_path: PathBuf,

    #[arg(long, default_value = ".cache/citesim/corpus.sqlite")]
    pub corpus_db: PathBuf,

    #[arg(long = "settings-id")]
    pub settings_ids: Vec<u32>,

    #[arg(long, default_value_t = 250)]
    pub candidates: usize,

    #[arg(long, default_value_t = DEFAULT_BASE_SEED)]
    pub base_seed: u64,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/citesim/experiment")]
    pub output_dir: PathBuf,
}
