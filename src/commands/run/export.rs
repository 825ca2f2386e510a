use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::model::Configuration;
use crate::util::{ensure_directory, escape_csv_cell};

use super::aggregate::AggregatedDistribution;
use super::store::ExperimentStore;

pub const EMPIRICAL_SETTINGS_KEY: &str = "empirical";
pub const DISTRIBUTIONS_FILE: &str = "distributions.csv";
pub const RESULTS_DIR: &str = "results";

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub results_dir: PathBuf,
    pub distributions_path: PathBuf,
    pub results_files: usize,
    pub result_rows: u64,
    pub empirical_articles: u64,
    pub distribution_rows: usize,
}

pub fn export_results(
    store: &mut ExperimentStore,
    grid: &[Configuration],
    empirical: &AggregatedDistribution,
    output_dir: &Path,
) -> Result<ExportSummary> {
    let results_dir = output_dir.join(RESULTS_DIR);
    ensure_directory(&results_dir)?;

    let mut distribution_rows = Vec::<(String, u64, u64)>::new();
    distribution_rows.extend(
        empirical
            .iter()
            .map(|(citation_count, frequency)| {
                (EMPIRICAL_SETTINGS_KEY.to_string(), citation_count, frequency)
            }),
    );

    let mut result_rows = 0u64;
    for configuration in grid {
        let path = results_dir.join(format!("settings_{}.csv", configuration.settings_id));
        let mut distribution = AggregatedDistribution::default();
        let settings_id = configuration.settings_id;

        write_csv_atomically(&path, |output| {
            writeln!(
                output,
                "settings_id,query_id,draw_rank,article_id,citation_count,similarity,score"
            )?;
            store.for_each_record(settings_id, |record| {
                for draw in &record.draws {
                    writeln!(
                        output,
                        "{},{},{},{},{},{},{}",
                        record.settings_id,
                        record.global_query_id,
                        draw.rank,
                        draw.article_id,
                        draw.citation_count,
                        draw.similarity,
                        draw.score
                    )?;
                    result_rows += 1;
                }
                distribution.fold_record(&record);
                Ok(())
            })
        })?;

        let settings_key = settings_id.to_string();
        distribution_rows.extend(
            distribution
                .iter()
                .map(|(citation_count, frequency)| (settings_key.clone(), citation_count, frequency)),
        );
    }

    let distributions_path = output_dir.join(DISTRIBUTIONS_FILE);
    write_csv_atomically(&distributions_path, |output| {
        writeln!(output, "settings_id,citation_count,occurrence_frequency")?;
        for (settings_key, citation_count, frequency) in &distribution_rows {
            writeln!(
                output,
                "{},{},{}",
                escape_csv_cell(settings_key),
                citation_count,
                frequency
            )?;
        }
        Ok(())
    })?;
    store.replace_distributions(&distribution_rows)?;

    Ok(ExportSummary {
        results_dir,
        distributions_path,
        results_files: grid.len(),
        result_rows,
        empirical_articles: empirical.total(),
        distribution_rows: distribution_rows.len(),
    })
}

fn write_csv_atomically<F>(path: &Path, write_rows: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let tmp_path = path.with_extension("csv.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("failed to create csv file: {}", tmp_path.display()))?;
    let mut output = BufWriter::new(file);
    write_rows(&mut output)
        .with_context(|| format!("failed to write csv file: {}", tmp_path.display()))?;

    let file = output
        .into_inner()
        .map_err(|err| err.into_error())
        .with_context(|| format!("failed to flush csv file: {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync csv file: {}", tmp_path.display()))?;
    drop(file);

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            tmp_path.display(),
            path.display()
        )
    })
}
