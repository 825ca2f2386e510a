use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub article_id: u64,
    pub title: String,
    pub year: i32,
    pub citation_count: u64,
    pub gov_score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArticleRecord {
    #[serde(flatten)]
    pub article: Article,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub global_query_id: u64,
    pub phrase: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsRecord {
    pub settings_id: u32,
    pub weights: Vec<f64>,
    pub page_size: usize,
    pub draw_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Weights {
    pub similarity: f64,
    pub year: f64,
    pub citations: f64,
    pub gov: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Configuration {
    pub settings_id: u32,
    pub weights: Weights,
    pub page_size: usize,
    pub draw_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub article: Article,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSet {
    pub global_query_id: u64,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Draw {
    pub rank: usize,
    pub article_id: u64,
    pub citation_count: u64,
    pub similarity: f64,
    pub score: f64,
    pub page: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionRecord {
    pub settings_id: u32,
    pub global_query_id: u64,
    pub requested: usize,
    pub underfilled: bool,
    pub draws: Vec<Draw>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputFingerprints {
    pub settings_sha256: String,
    pub queries_sha256: String,
    pub normalizer_checksum: String,
    pub base_seed: u64,
    pub candidate_limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentPaths {
    pub settings_path: String,
    pub queries_path: String,
    pub normalizer_path: String,
    pub corpus_db: String,
    pub output_dir: String,
    pub experiment_db: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExperimentCounts {
    pub configurations: usize,
    pub queries_total: usize,
    pub queries_completed_before: usize,
    pub queries_completed_after: usize,
    pub batches_this_run: usize,
    pub units_completed: usize,
    pub units_underfilled: usize,
    pub units_failed: usize,
    pub draws_written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub updated_at: String,
    pub phase: String,
    pub batch_size: usize,
    pub duration_ms: u128,
    pub paths: ExperimentPaths,
    pub fingerprints: InputFingerprints,
    pub counts: ExperimentCounts,
    pub warnings: Vec<String>,
}
