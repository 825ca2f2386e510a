use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::model::{Configuration, SettingsRecord, Weights};
use crate::util::read_json;

pub const DEFAULT_PAGE_SIZES: [usize; 2] = [10, 100];
pub const DEFAULT_DRAW_COUNTS: [usize; 3] = [10, 25, 50];
pub const DEFAULT_WEIGHT_LEVELS: [f64; 8] = [0.0, 0.1, 0.25, 0.33, 0.5, 0.75, 0.9, 1.0];

pub fn load_grid(path: &Path) -> Result<Vec<Configuration>> {
    let records: Vec<SettingsRecord> = read_json(path)?;
    validate_grid(records)
        .with_context(|| format!("configuration grid {} is malformed", path.display()))
}

pub fn validate_grid(records: Vec<SettingsRecord>) -> Result<Vec<Configuration>> {
    if records.is_empty() {
        bail!("configuration grid is empty");
    }

    let mut seen = HashSet::<u32>::new();
    let mut out = Vec::<Configuration>::with_capacity(records.len());
    for (position, record) in records.into_iter().enumerate() {
        let configuration = validate_record(&record)
            .with_context(|| format!("grid entry {position} (settings_id {})", record.settings_id))?;
        if !seen.insert(configuration.settings_id) {
            bail!(
                "grid entry {position} repeats settings_id {}",
                configuration.settings_id
            );
        }
        out.push(configuration);
    }

    Ok(out)
}

fn validate_record(record: &SettingsRecord) -> Result<Configuration> {
    let [similarity, year, citations, gov] = record.weights.as_slice() else {
        bail!(
            "expected 4 weights [similarity, year, citations, gov], found {}",
            record.weights.len()
        );
    };

    if record.weights.iter().any(|value| !value.is_finite()) {
        bail!("weights must be finite, found {:?}", record.weights);
    }
    if record.page_size == 0 {
        bail!("page_size must be at least 1");
    }
    if record.draw_count == 0 {
        bail!("draw_count must be at least 1");
    }

    Ok(Configuration {
        settings_id: record.settings_id,
        weights: Weights {
            similarity: *similarity,
            year: *year,
            citations: *citations,
            gov: *gov,
        },
        page_size: record.page_size,
        draw_count: record.draw_count,
    })
}

pub fn default_grid() -> Vec<SettingsRecord> {
    let weight_vectors = valid_weight_vectors(&DEFAULT_WEIGHT_LEVELS);

    let mut records = Vec::<SettingsRecord>::new();
    for page_size in DEFAULT_PAGE_SIZES {
        for draw_count in DEFAULT_DRAW_COUNTS {
            for weights in &weight_vectors {
                records.push(SettingsRecord {
                    settings_id: records.len() as u32,
                    weights: weights.clone(),
                    page_size,
                    draw_count,
                });
            }
        }
    }
    records
}

fn valid_weight_vectors(levels: &[f64]) -> Vec<Vec<f64>> {
    let mut out = Vec::<Vec<f64>>::new();
    for &a in levels {
        for &b in levels {
            for &c in levels {
                for &d in levels {
                    let sum = a + b + c + d;
                    if (0.99..=1.0).contains(&sum) {
                        out.push(vec![a, b, c, d]);
                    }
                }
            }
        }
    }
    out
}
