use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::run::{EXPERIMENT_DB_FILE, ExperimentStore};

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args.output_dir.join(EXPERIMENT_DB_FILE);
    info!(output_dir = %args.output_dir.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "experiment store missing; no run has started here");
        return Ok(());
    }

    let store = ExperimentStore::open_read_only(&db_path)?;
    let Some(checkpoint) = store.load_checkpoint()? else {
        warn!(path = %db_path.display(), "experiment store has no checkpoint");
        return Ok(());
    };
    let units = store.unit_status_counts()?;

    info!(
        phase = checkpoint.phase.as_str(),
        queries_completed = checkpoint.queries_completed,
        last_query_id = ?checkpoint.last_query_id,
        batches_completed = checkpoint.batches_completed,
        base_seed = checkpoint.fingerprints.base_seed,
        candidate_limit = checkpoint.fingerprints.candidate_limit,
        settings_sha256 = %checkpoint.fingerprints.settings_sha256,
        queries_sha256 = %checkpoint.fingerprints.queries_sha256,
        normalizer_checksum = %checkpoint.fingerprints.normalizer_checksum,
        "loaded checkpoint"
    );
    info!(
        path = %db_path.display(),
        units_completed = units.completed,
        units_underfilled = units.underfilled,
        units_failed = units.failed,
        draws = store.count_draws()?,
        "experiment store status"
    );
    if let Some(state) = store.batch_state(checkpoint.batches_completed)? {
        warn!(
            batch = checkpoint.batches_completed,
            state = state.as_str(),
            "batch left unfinished; the next run restarts it"
        );
    }

    Ok(())
}
