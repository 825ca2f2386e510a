mod pagination;
mod sampling;
mod scoring;
mod seed;

use anyhow::{Context, Result};

use crate::model::{Configuration, DistributionRecord};

use pagination::WorkingPageSet;
use sampling::draw_without_replacement;
use scoring::rank_candidates;
use seed::unit_rng;

pub use scoring::{PreparedCandidate, prepare_candidates};
pub use seed::DEFAULT_BASE_SEED;

pub fn simulate_unit(
    prepared: &[PreparedCandidate],
    configuration: &Configuration,
    global_query_id: u64,
    base_seed: u64,
) -> Result<DistributionRecord> {
    let ranked = rank_candidates(prepared, &configuration.weights);
    let mut pages = WorkingPageSet::paginate(&ranked, configuration.page_size).with_context(|| {
        format!(
            "failed to paginate candidates for settings {}",
            configuration.settings_id
        )
    })?;
    let mut rng = unit_rng(base_seed, global_query_id);
    let outcome = draw_without_replacement(&mut pages, configuration.draw_count, &mut rng)?;

    Ok(DistributionRecord {
        settings_id: configuration.settings_id,
        global_query_id,
        requested: outcome.requested,
        underfilled: outcome.underfilled,
        draws: outcome.draws,
    })
}
