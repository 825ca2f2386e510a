use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cli::ProbeArgs;
use crate::engine::{prepare_candidates, simulate_unit};
use crate::grid::load_grid;
use crate::model::{Configuration, Draw, Query, Weights};
use crate::normalization::NormalizationModel;
use crate::queries::QuerySetReader;
use crate::retrieval::{CandidateRetriever, CorpusIndex};

#[derive(Debug, Clone, Serialize)]
struct ProbeResponse {
    query_id: u64,
    phrase: String,
    candidates: usize,
    base_seed: u64,
    records: Vec<ProbeRecord>,
}

#[derive(Debug, Clone, Serialize)]
struct ProbeRecord {
    settings_id: u32,
    weights: Weights,
    page_size: usize,
    draw_count: usize,
    underfilled: bool,
    draws: Vec<Draw>,
}

pub fn run(args: ProbeArgs) -> Result<()> {
    let grid = select_configurations(load_grid(&args.settings_path)?, &args.settings_ids)?;
    let normalizer = NormalizationModel::load(&args.normalizer_path)?;
    let retriever = CorpusIndex::load(&args.corpus_db)?;
    let query = find_query(&args.queries_path, args.query_id)?;

    let response = probe_query(&query, &grid, &normalizer, &retriever, args.candidates, args.base_seed)?;
    info!(
        query_id = response.query_id,
        candidates = response.candidates,
        configurations = response.records.len(),
        "probe completed"
    );

    if args.json {
        write_json_response(&response)
    } else {
        write_text_response(&response)
    }
}

fn select_configurations(grid: Vec<Configuration>, settings_ids: &[u32]) -> Result<Vec<Configuration>> {
    if settings_ids.is_empty() {
        return Ok(grid);
    }

    for settings_id in settings_ids {
        if !grid.iter().any(|configuration| configuration.settings_id == *settings_id) {
            bail!("settings_id {settings_id} is not part of the configuration grid");
        }
    }
    Ok(grid
        .into_iter()
        .filter(|configuration| settings_ids.contains(&configuration.settings_id))
        .collect())
}

fn find_query(queries_path: &Path, query_id: u64) -> Result<Query> {
    for query in QuerySetReader::open(queries_path)? {
        let query = query?;
        if query.global_query_id == query_id {
            return Ok(query);
        }
        if query.global_query_id > query_id {
            break;
        }
    }
    bail!(
        "query {query_id} not found in {}",
        queries_path.display()
    )
}

fn probe_query(
    query: &Query,
    grid: &[Configuration],
    normalizer: &NormalizationModel,
    retriever: &dyn CandidateRetriever,
    candidates: usize,
    base_seed: u64,
) -> Result<ProbeResponse> {
    let candidate_set = retriever
        .retrieve(query, candidates)
        .with_context(|| format!("candidate retrieval failed for query {}", query.global_query_id))?;
    let prepared = prepare_candidates(&candidate_set, normalizer);

    let mut records = Vec::<ProbeRecord>::with_capacity(grid.len());
    for configuration in grid {
        let record = simulate_unit(&prepared, configuration, query.global_query_id, base_seed)?;
        records.push(ProbeRecord {
            settings_id: configuration.settings_id,
            weights: configuration.weights,
            page_size: configuration.page_size,
            draw_count: configuration.draw_count,
            underfilled: record.underfilled,
            draws: record.draws,
        });
    }

    Ok(ProbeResponse {
        query_id: query.global_query_id,
        phrase: query.phrase.clone(),
        candidates: candidate_set.candidates.len(),
        base_seed,
        records,
    })
}

fn write_json_response(response: &ProbeResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, response)
        .context("failed to serialize probe json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_response(response: &ProbeResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Query {}: {}", response.query_id, response.phrase)?;
    writeln!(
        output,
        "Candidates: {} base_seed={}",
        response.candidates, response.base_seed
    )?;

    for record in &response.records {
        writeln!(output)?;
        writeln!(
            output,
            "Settings {} weights=[{}, {}, {}, {}] page_size={} k={} drawn={}{}",
            record.settings_id,
            record.weights.similarity,
            record.weights.year,
            record.weights.citations,
            record.weights.gov,
            record.page_size,
            record.draw_count,
            record.draws.len(),
            if record.underfilled { " (underfilled)" } else { "" },
        )?;
        for draw in &record.draws {
            writeln!(
                output,
                "  {:>3}. article={} citations={} page={} similarity={:.4} score={:.4}",
                draw.rank,
                draw.article_id,
                draw.citation_count,
                draw.page,
                draw.similarity,
                draw.score
            )?;
        }
    }

    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::grid::validate_grid;
    use crate::model::{Article, SettingsRecord};
    use crate::normalization::NormalizerFit;

    fn fixture() -> (CorpusIndex, NormalizationModel, Vec<Configuration>) {
        let entries = (1..=12u64)
            .map(|article_id| {
                (
                    Article {
                        article_id,
                        title: format!("paper {article_id}"),
                        year: 2000 + article_id as i32,
                        citation_count: article_id * 5,
                        gov_score: 50.0,
                    },
                    vec![1.0, article_id as f32 * 0.1],
                )
            })
            .collect::<Vec<(Article, Vec<f32>)>>();

        let mut fit = NormalizerFit::default();
        for (article, _) in &entries {
            fit.observe(article).expect("observe");
        }
        let grid = validate_grid(vec![
            SettingsRecord {
                settings_id: 4,
                weights: vec![1.0, 0.0, 0.0, 0.0],
                page_size: 5,
                draw_count: 3,
            },
            SettingsRecord {
                settings_id: 9,
                weights: vec![0.0, 0.0, 1.0, 0.0],
                page_size: 10,
                draw_count: 20,
            },
        ])
        .expect("grid");

        (
            CorpusIndex::from_entries(entries).expect("index"),
            fit.finish().expect("fit"),
            grid,
        )
    }

    fn query() -> Query {
        Query {
            global_query_id: 77,
            phrase: "probe".to_string(),
            embedding: vec![1.0, 0.0],
        }
    }

    #[test]
    fn probe_is_reproducible_and_reports_underfill() {
        let (index, normalizer, grid) = fixture();

        let first = probe_query(&query(), &grid, &normalizer, &index, 250, 42).expect("probe");
        let second = probe_query(&query(), &grid, &normalizer, &index, 250, 42).expect("probe");

        assert_eq!(first.candidates, 12);
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.records[0].draws.len(), 3);
        assert!(!first.records[0].underfilled);
        assert_eq!(first.records[1].draws.len(), 12);
        assert!(first.records[1].underfilled);
        assert_eq!(first.records[0].draws, second.records[0].draws);
    }

    #[test]
    fn settings_filter_rejects_unknown_ids() {
        let (_, _, grid) = fixture();
        assert_eq!(select_configurations(grid.clone(), &[9]).expect("filter").len(), 1);
        assert_eq!(select_configurations(grid.clone(), &[]).expect("all").len(), 2);
        assert!(select_configurations(grid, &[5]).is_err());
    }

    #[test]
    fn find_query_locates_by_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queries.jsonl");
        fs::write(
            &path,
            [
                r#"{"global_query_id": 2, "phrase": "first", "embedding": [1.0]}"#,
                r#"{"global_query_id": 5, "phrase": "second", "embedding": [0.5]}"#,
            ]
            .join("\n"),
        )
        .expect("write");

        assert_eq!(find_query(&path, 5).expect("found").phrase, "second");
        assert!(find_query(&path, 3).is_err());
    }
}
