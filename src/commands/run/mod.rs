mod aggregate;
mod checkpoint;
mod export;
mod store;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::corpus::{empirical_citation_distribution, open_corpus_read_only};
use crate::engine::{prepare_candidates, simulate_unit};
use crate::grid::load_grid;
use crate::model::{
    Configuration, ExperimentCounts, ExperimentPaths, ExperimentRunManifest, InputFingerprints,
    Query,
};
use crate::normalization::NormalizationModel;
use crate::queries::{QuerySetReader, count_queries};
use crate::retrieval::{CandidateRetriever, CorpusIndex};
use crate::util::{ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty};

use aggregate::AggregatedDistribution;
use checkpoint::{Checkpoint, RunPhase};
use export::export_results;
use store::UnitOutcome;

pub use store::ExperimentStore;

pub const EXPERIMENT_DB_FILE: &str = "experiment.sqlite";

#[derive(Debug, Clone)]
pub struct ExperimentPlan {
    pub settings_path: PathBuf,
    pub queries_path: PathBuf,
    pub normalizer_path: PathBuf,
    pub corpus_db: PathBuf,
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub candidate_limit: usize,
    pub base_seed: u64,
    pub max_batches: Option<usize>,
}

impl ExperimentPlan {
    pub fn experiment_db(&self) -> PathBuf {
        self.output_dir.join(EXPERIMENT_DB_FILE)
    }
}

impl From<RunArgs> for ExperimentPlan {
    fn from(args: RunArgs) -> Self {
        Self {
            settings_path: args.settings_path,
            queries_path: args.queries_path,
            normalizer_path: args.normalizer_path,
            corpus_db: args.corpus_db,
            output_dir: args.output_dir,
            batch_size: args.batch_size,
            candidate_limit: args.candidates,
            base_seed: args.base_seed,
            max_batches: args.max_batches,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentSummary {
    pub phase: RunPhase,
    pub counts: ExperimentCounts,
    pub manifest_path: PathBuf,
    pub warnings: Vec<String>,
}

pub fn run(args: RunArgs) -> Result<()> {
    let plan = ExperimentPlan::from(args);
    let grid = load_grid(&plan.settings_path)?;
    let normalizer = NormalizationModel::load(&plan.normalizer_path)?;
    let retriever = CorpusIndex::load(&plan.corpus_db)?;

    let summary = execute(&plan, &grid, &normalizer, &retriever)?;
    info!(
        phase = summary.phase.as_str(),
        path = %summary.manifest_path.display(),
        queries_completed = summary.counts.queries_completed_after,
        queries_total = summary.counts.queries_total,
        warnings = summary.warnings.len(),
        "experiment invocation finished"
    );
    Ok(())
}

pub fn execute(
    plan: &ExperimentPlan,
    grid: &[Configuration],
    normalizer: &NormalizationModel,
    retriever: &dyn CandidateRetriever,
) -> Result<ExperimentSummary> {
    if plan.batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }
    if grid.is_empty() {
        bail!("configuration grid is empty");
    }

    let started_at = now_utc_string();
    let started = Instant::now();
    let run_id = format!("run-{}", utc_compact_string(Utc::now()));
    ensure_directory(&plan.output_dir)?;

    let fingerprints = InputFingerprints {
        settings_sha256: sha256_file(&plan.settings_path)?,
        queries_sha256: sha256_file(&plan.queries_path)?,
        normalizer_checksum: normalizer.checksum.clone(),
        base_seed: plan.base_seed,
        candidate_limit: plan.candidate_limit,
    };
    let queries_total = count_queries(&plan.queries_path)?;

    let experiment_db = plan.experiment_db();
    let mut store = ExperimentStore::open(&experiment_db)?;
    let mut checkpoint = open_checkpoint(&mut store, &fingerprints, grid.len())?;

    let mut reader = QuerySetReader::open(&plan.queries_path)?;
    skip_completed_queries(&mut reader, &checkpoint)?;

    let mut counts = ExperimentCounts {
        configurations: grid.len(),
        queries_total,
        queries_completed_before: checkpoint.queries_completed as usize,
        ..ExperimentCounts::default()
    };
    let mut warnings = Vec::<String>::new();

    let mut stopped_early = false;
    if checkpoint.phase != RunPhase::Finished {
        while (checkpoint.queries_completed as usize) < queries_total {
            if plan
                .max_batches
                .is_some_and(|limit| counts.batches_this_run >= limit)
            {
                stopped_early = true;
                break;
            }

            let batch = read_batch(&mut reader, plan.batch_size)?;
            if batch.is_empty() {
                break;
            }

            let batch_index = checkpoint.batches_completed;
            let mut writer =
                store.begin_batch(batch_index, batch[0].global_query_id, batch.len())?;
            for query in &batch {
                let outcomes = simulate_query(query, grid, normalizer, retriever, plan, &mut warnings)?;
                writer.write_units(&outcomes)?;
            }

            let next = checkpoint.advanced(
                batch.len() as u64,
                batch.last().map(|query| query.global_query_id),
            )?;
            let stats = writer.commit(&next)?;
            checkpoint = next;

            counts.batches_this_run += 1;
            counts.units_completed += stats.units_completed;
            counts.units_underfilled += stats.units_underfilled;
            counts.units_failed += stats.units_failed;
            counts.draws_written += stats.draws_written;

            info!(
                batch = batch_index,
                queries = batch.len(),
                queries_completed = checkpoint.queries_completed,
                queries_total,
                units_failed = stats.units_failed,
                units_underfilled = stats.units_underfilled,
                "batch committed"
            );
        }
    }

    if counts.units_underfilled > 0 {
        warnings.push(format!(
            "{} units drew fewer articles than requested",
            counts.units_underfilled
        ));
    }

    if stopped_early {
        info!(
            queries_completed = checkpoint.queries_completed,
            queries_total,
            batches = counts.batches_this_run,
            "batch limit reached; re-run to resume"
        );
    } else {
        let empirical = load_empirical_distribution(&plan.corpus_db)?;
        let export = export_results(&mut store, grid, &empirical, &plan.output_dir)?;
        checkpoint.phase = checkpoint.phase.transition(RunPhase::Finished)?;
        store.save_checkpoint(&checkpoint)?;
        info!(
            results_dir = %export.results_dir.display(),
            distributions = %export.distributions_path.display(),
            results_files = export.results_files,
            result_rows = export.result_rows,
            empirical_articles = export.empirical_articles,
            distribution_rows = export.distribution_rows,
            "experiment results exported"
        );
    }

    counts.queries_completed_after = checkpoint.queries_completed as usize;

    let manifest = ExperimentRunManifest {
        manifest_version: 1,
        run_id,
        started_at,
        updated_at: now_utc_string(),
        phase: checkpoint.phase.as_str().to_string(),
        batch_size: plan.batch_size,
        duration_ms: started.elapsed().as_millis(),
        paths: ExperimentPaths {
            settings_path: plan.settings_path.display().to_string(),
            queries_path: plan.queries_path.display().to_string(),
            normalizer_path: plan.normalizer_path.display().to_string(),
            corpus_db: plan.corpus_db.display().to_string(),
            output_dir: plan.output_dir.display().to_string(),
            experiment_db: experiment_db.display().to_string(),
        },
        fingerprints,
        counts: counts.clone(),
        warnings: warnings.clone(),
    };

    let manifest_path = plan
        .output_dir
        .join("manifests")
        .join(format!("run_{}.json", utc_compact_string(Utc::now())));
    write_json_pretty(&manifest_path, &manifest)?;

    Ok(ExperimentSummary {
        phase: checkpoint.phase,
        counts,
        manifest_path,
        warnings,
    })
}

fn open_checkpoint(
    store: &mut ExperimentStore,
    fingerprints: &InputFingerprints,
    configurations: usize,
) -> Result<Checkpoint> {
    let Some(stored) = store.load_checkpoint()? else {
        store.ensure_no_results()?;
        let mut checkpoint = Checkpoint::fresh(fingerprints.clone());
        checkpoint.phase = checkpoint.phase.transition(RunPhase::Running)?;
        store.save_checkpoint(&checkpoint)?;
        info!(path = %store.path().display(), "starting new experiment");
        return Ok(checkpoint);
    };

    let mismatches = stored.fingerprint_mismatches(fingerprints);
    if !mismatches.is_empty() {
        bail!(
            "inputs changed since the experiment in {} started ({}); use a fresh --output-dir",
            store.path().display(),
            mismatches.join("; ")
        );
    }
    store.verify_checkpoint(&stored, configurations)?;

    let mut checkpoint = stored;
    checkpoint.phase = match checkpoint.phase {
        RunPhase::Finished => RunPhase::Finished,
        RunPhase::NotStarted => checkpoint.phase.transition(RunPhase::Running)?,
        phase => phase.transition(RunPhase::Resumed)?,
    };
    store.save_checkpoint(&checkpoint)?;

    info!(
        path = %store.path().display(),
        phase = checkpoint.phase.as_str(),
        queries_completed = checkpoint.queries_completed,
        batches_completed = checkpoint.batches_completed,
        "checkpoint verified"
    );
    Ok(checkpoint)
}

fn skip_completed_queries(reader: &mut QuerySetReader, checkpoint: &Checkpoint) -> Result<()> {
    let mut last_query_id = None;
    for position in 0..checkpoint.queries_completed {
        let Some(query) = reader.next().transpose()? else {
            bail!(
                "checkpoint corruption: query set ends after {} queries but the checkpoint records {} completed",
                position,
                checkpoint.queries_completed
            );
        };
        last_query_id = Some(query.global_query_id);
    }

    if last_query_id != checkpoint.last_query_id {
        bail!(
            "checkpoint corruption: query at cursor position {} is {:?} but the checkpoint records {:?}",
            checkpoint.queries_completed,
            last_query_id,
            checkpoint.last_query_id
        );
    }
    Ok(())
}

fn read_batch(reader: &mut QuerySetReader, batch_size: usize) -> Result<Vec<Query>> {
    let mut batch = Vec::<Query>::with_capacity(batch_size);
    while batch.len() < batch_size {
        match reader.next() {
            Some(query) => batch.push(query?),
            None => break,
        }
    }
    Ok(batch)
}

fn simulate_query(
    query: &Query,
    grid: &[Configuration],
    normalizer: &NormalizationModel,
    retriever: &dyn CandidateRetriever,
    plan: &ExperimentPlan,
    warnings: &mut Vec<String>,
) -> Result<Vec<UnitOutcome>> {
    let candidate_set = match retriever.retrieve(query, plan.candidate_limit) {
        Ok(candidate_set) => candidate_set,
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(
                query_id = query.global_query_id,
                error = %reason,
                "candidate retrieval failed; marking query units failed"
            );
            warnings.push(format!(
                "retrieval failed for query {}: {}",
                query.global_query_id, reason
            ));
            return Ok(grid
                .iter()
                .map(|configuration| UnitOutcome::Failed {
                    settings_id: configuration.settings_id,
                    global_query_id: query.global_query_id,
                    requested: configuration.draw_count,
                    reason: reason.clone(),
                })
                .collect());
        }
    };

    let prepared = prepare_candidates(&candidate_set, normalizer);
    let mut outcomes = Vec::<UnitOutcome>::with_capacity(grid.len());
    for configuration in grid {
        let record = simulate_unit(&prepared, configuration, query.global_query_id, plan.base_seed)?;
        if record.underfilled {
            warn!(
                settings_id = record.settings_id,
                query_id = record.global_query_id,
                requested = record.requested,
                drawn = record.draws.len(),
                "unit underfilled"
            );
        }
        outcomes.push(UnitOutcome::Drawn(record));
    }
    Ok(outcomes)
}

fn load_empirical_distribution(corpus_db: &Path) -> Result<AggregatedDistribution> {
    let connection = open_corpus_read_only(corpus_db)?;
    Ok(AggregatedDistribution::from_frequencies(
        empirical_citation_distribution(&connection)?,
    ))
}
