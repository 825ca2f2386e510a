use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, params};
use tracing::warn;

use crate::corpus::{configure_connection, from_sql_id, to_sql_id};
use crate::model::{DistributionRecord, Draw, InputFingerprints};
use crate::util::now_utc_string;

use super::checkpoint::{BatchState, Checkpoint, RunPhase};

pub const EXPERIMENT_SCHEMA_VERSION: &str = "0.1.0";

pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_UNDERFILLED: &str = "underfilled";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Drawn(DistributionRecord),
    Failed {
        settings_id: u32,
        global_query_id: u64,
        requested: usize,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchWriteStats {
    pub units_completed: usize,
    pub units_underfilled: usize,
    pub units_failed: usize,
    pub draws_written: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitStatusCounts {
    pub completed: u64,
    pub underfilled: u64,
    pub failed: u64,
}

pub struct ExperimentStore {
    connection: Connection,
    path: PathBuf,
}

impl ExperimentStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        configure_connection(&connection)?;
        ensure_experiment_schema(&connection)?;
        Ok(Self {
            connection,
            path: path.to_path_buf(),
        })
    }

    pub fn open_read_only(path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open experiment store read-only: {}", path.display()))?;
        Ok(Self {
            connection,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let row = self
            .connection
            .query_row(
                "
                SELECT phase, queries_completed, last_query_id, batches_completed,
                       settings_sha256, queries_sha256, normalizer_checksum,
                       base_seed, candidate_limit
                FROM checkpoint
                WHERE id = 1
                ",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, i64>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            phase,
            queries_completed,
            last_query_id,
            batches_completed,
            settings_sha256,
            queries_sha256,
            normalizer_checksum,
            base_seed,
            candidate_limit,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(Checkpoint {
            phase: RunPhase::parse(&phase)?,
            queries_completed: from_sql_id(queries_completed)?,
            last_query_id: last_query_id.map(from_sql_id).transpose()?,
            batches_completed: from_sql_id(batches_completed)?,
            fingerprints: InputFingerprints {
                settings_sha256,
                queries_sha256,
                normalizer_checksum,
                base_seed: base_seed
                    .parse::<u64>()
                    .with_context(|| format!("checkpoint base_seed '{base_seed}' is not a u64"))?,
                candidate_limit: usize::try_from(candidate_limit)
                    .context("checkpoint candidate_limit is negative")?,
            },
        }))
    }

    pub fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let tx = self.connection.transaction()?;
        advance_checkpoint(&tx, checkpoint)?;
        tx.commit()?;
        Ok(())
    }

    pub fn verify_checkpoint(&self, checkpoint: &Checkpoint, configurations: usize) -> Result<()> {
        let (distinct_queries, max_query_id, unit_rows) = self.connection.query_row(
            "SELECT COUNT(DISTINCT query_id), MAX(query_id), COUNT(*) FROM units",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;
        let distinct_queries = from_sql_id(distinct_queries)?;
        let max_query_id = max_query_id.map(from_sql_id).transpose()?;
        let unit_rows = from_sql_id(unit_rows)?;

        if distinct_queries != checkpoint.queries_completed {
            bail!(
                "checkpoint corruption in {}: cursor records {} completed queries but unit rows exist for {}; refusing to resume from an unverified offset",
                self.path.display(),
                checkpoint.queries_completed,
                distinct_queries
            );
        }
        if max_query_id != checkpoint.last_query_id {
            bail!(
                "checkpoint corruption in {}: cursor points at query {:?} but the last stored unit belongs to query {:?}",
                self.path.display(),
                checkpoint.last_query_id,
                max_query_id
            );
        }
        let expected_units = checkpoint.queries_completed * configurations as u64;
        if unit_rows != expected_units {
            bail!(
                "checkpoint corruption in {}: expected {} unit rows ({} queries x {} configurations), found {}",
                self.path.display(),
                expected_units,
                checkpoint.queries_completed,
                configurations,
                unit_rows
            );
        }

        let (draw_rows, drawn_total) = self.connection.query_row(
            "SELECT (SELECT COUNT(*) FROM draws), (SELECT COALESCE(SUM(drawn), 0) FROM units)",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        if draw_rows != drawn_total {
            bail!(
                "checkpoint corruption in {}: units declare {} draws but {} draw rows are stored",
                self.path.display(),
                drawn_total,
                draw_rows
            );
        }

        let (completed_batches, stray_batches) = self.connection.query_row(
            "
            SELECT
              (SELECT COUNT(*) FROM batches WHERE state = ?1),
              (SELECT COUNT(*) FROM batches WHERE state != ?1 AND batch_index != ?2)
            ",
            params![
                BatchState::Completed.as_str(),
                to_sql_id(checkpoint.batches_completed)?
            ],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        if from_sql_id(completed_batches)? != checkpoint.batches_completed {
            bail!(
                "checkpoint corruption in {}: cursor records {} completed batches but {} are marked completed",
                self.path.display(),
                checkpoint.batches_completed,
                completed_batches
            );
        }
        if stray_batches != 0 {
            bail!(
                "checkpoint corruption in {}: {} unfinished batches exist away from the cursor batch {}",
                self.path.display(),
                stray_batches,
                checkpoint.batches_completed
            );
        }

        Ok(())
    }

    pub fn ensure_no_results(&self) -> Result<()> {
        let (units, draws, batches) = self.connection.query_row(
            "
            SELECT
              (SELECT COUNT(*) FROM units),
              (SELECT COUNT(*) FROM draws),
              (SELECT COUNT(*) FROM batches)
            ",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;
        if units + draws + batches > 0 {
            bail!(
                "checkpoint corruption in {}: result rows exist but no checkpoint row ({} units, {} draws, {} batches); refusing to start over them",
                self.path.display(),
                units,
                draws,
                batches
            );
        }
        Ok(())
    }

    pub fn batch_state(&self, batch_index: u64) -> Result<Option<BatchState>> {
        let state = self
            .connection
            .query_row(
                "SELECT state FROM batches WHERE batch_index = ?1",
                [to_sql_id(batch_index)?],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        state.as_deref().map(BatchState::parse).transpose()
    }

    /// Opens the transaction that will carry one batch's rows and, on
    /// commit, the advanced cursor. Dropping the writer rolls everything back.
    pub fn begin_batch(
        &mut self,
        batch_index: u64,
        first_query_id: u64,
        query_count: usize,
    ) -> Result<BatchWriter<'_>> {
        let stored = self.batch_state(batch_index)?;
        if stored == Some(BatchState::InProgress) {
            warn!(
                batch = batch_index,
                "restarting batch left in progress by an earlier invocation"
            );
        }
        let state = stored
            .unwrap_or(BatchState::Pending)
            .transition(BatchState::InProgress)
            .with_context(|| format!("batch {batch_index} cannot be started"))?;

        self.connection.execute(
            "
            INSERT INTO batches(batch_index, state, first_query_id, query_count, updated_at)
            VALUES(?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(batch_index) DO UPDATE SET
              state=excluded.state,
              first_query_id=excluded.first_query_id,
              query_count=excluded.query_count,
              updated_at=excluded.updated_at
            ",
            params![
                to_sql_id(batch_index)?,
                state.as_str(),
                to_sql_id(first_query_id)?,
                query_count as i64,
                now_utc_string(),
            ],
        )?;

        let tx = self.connection.transaction()?;
        Ok(BatchWriter {
            tx,
            batch_index,
            state,
            stats: BatchWriteStats::default(),
        })
    }

    pub fn for_each_record<F>(&self, settings_id: u32, mut visit: F) -> Result<()>
    where
        F: FnMut(DistributionRecord) -> Result<()>,
    {
        let mut statement = self.connection.prepare(
            "
            SELECT u.query_id, u.status, u.requested,
                   d.draw_rank, d.article_id, d.citation_count, d.similarity, d.score, d.page
            FROM units u
            LEFT JOIN draws d ON d.settings_id = u.settings_id AND d.query_id = u.query_id
            WHERE u.settings_id = ?1 AND u.status != ?2
            ORDER BY u.query_id ASC, d.draw_rank ASC
            ",
        )?;

        let mut rows = statement.query(params![settings_id, STATUS_FAILED])?;
        let mut current: Option<DistributionRecord> = None;
        while let Some(row) = rows.next()? {
            let query_id = from_sql_id(row.get(0)?)?;
            let status = row.get::<_, String>(1)?;
            let requested = from_sql_id(row.get(2)?)? as usize;

            if current.as_ref().map(|record| record.global_query_id) != Some(query_id) {
                if let Some(done) = current.take() {
                    visit(done)?;
                }
                current = Some(DistributionRecord {
                    settings_id,
                    global_query_id: query_id,
                    requested,
                    underfilled: status == STATUS_UNDERFILLED,
                    draws: Vec::new(),
                });
            }

            let Some(draw_rank) = row.get::<_, Option<i64>>(3)? else {
                continue;
            };
            if let Some(record) = current.as_mut() {
                record.draws.push(Draw {
                    rank: from_sql_id(draw_rank)? as usize,
                    article_id: from_sql_id(row.get(4)?)?,
                    citation_count: from_sql_id(row.get(5)?)?,
                    similarity: row.get(6)?,
                    score: row.get(7)?,
                    page: from_sql_id(row.get(8)?)? as usize,
                });
            }
        }

        if let Some(done) = current.take() {
            visit(done)?;
        }
        Ok(())
    }

    pub fn replace_distributions(&mut self, rows: &[(String, u64, u64)]) -> Result<()> {
        let tx = self.connection.transaction()?;
        tx.execute("DELETE FROM distributions", [])?;
        {
            let mut statement = tx.prepare_cached(
                "
                INSERT INTO distributions(settings_key, citation_count, frequency)
                VALUES(?1, ?2, ?3)
                ",
            )?;
            for (settings_key, citation_count, frequency) in rows {
                statement.execute(params![
                    settings_key,
                    to_sql_id(*citation_count)?,
                    to_sql_id(*frequency)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn unit_status_counts(&self) -> Result<UnitStatusCounts> {
        let mut statement = self
            .connection
            .prepare("SELECT status, COUNT(*) FROM units GROUP BY status")?;
        let mut rows = statement.query([])?;
        let mut counts = UnitStatusCounts::default();
        while let Some(row) = rows.next()? {
            let status = row.get::<_, String>(0)?;
            let count = from_sql_id(row.get(1)?)?;
            match status.as_str() {
                STATUS_COMPLETED => counts.completed = count,
                STATUS_UNDERFILLED => counts.underfilled = count,
                STATUS_FAILED => counts.failed = count,
                other => bail!("unknown unit status '{other}' in {}", self.path.display()),
            }
        }
        Ok(counts)
    }

    pub fn count_draws(&self) -> Result<u64> {
        let count = self
            .connection
            .query_row("SELECT COUNT(*) FROM draws", [], |row| row.get::<_, i64>(0))?;
        from_sql_id(count)
    }

    #[cfg(test)]
    pub(super) fn connection(&self) -> &Connection {
        &self.connection
    }
}

pub struct BatchWriter<'conn> {
    tx: Transaction<'conn>,
    batch_index: u64,
    state: BatchState,
    stats: BatchWriteStats,
}

impl BatchWriter<'_> {
    pub fn write_units(&mut self, outcomes: &[UnitOutcome]) -> Result<()> {
        let stats = write_batch_rows(&self.tx, outcomes, self.batch_index)?;
        self.stats.units_completed += stats.units_completed;
        self.stats.units_underfilled += stats.units_underfilled;
        self.stats.units_failed += stats.units_failed;
        self.stats.draws_written += stats.draws_written;
        Ok(())
    }

    pub fn commit(self, next: &Checkpoint) -> Result<BatchWriteStats> {
        let state = self.state.transition(BatchState::Completed)?;
        self.tx.execute(
            "UPDATE batches SET state = ?1, updated_at = ?2 WHERE batch_index = ?3",
            params![state.as_str(), now_utc_string(), to_sql_id(self.batch_index)?],
        )?;
        advance_checkpoint(&self.tx, next)?;
        self.tx
            .commit()
            .with_context(|| format!("failed to commit batch {}", self.batch_index))?;
        Ok(self.stats)
    }
}

fn ensure_experiment_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS checkpoint (
          id INTEGER PRIMARY KEY CHECK (id = 1),
          phase TEXT NOT NULL,
          queries_completed INTEGER NOT NULL,
          last_query_id INTEGER,
          batches_completed INTEGER NOT NULL,
          settings_sha256 TEXT NOT NULL,
          queries_sha256 TEXT NOT NULL,
          normalizer_checksum TEXT NOT NULL,
          base_seed TEXT NOT NULL,
          candidate_limit INTEGER NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS units (
          settings_id INTEGER NOT NULL,
          query_id INTEGER NOT NULL,
          batch_index INTEGER NOT NULL,
          status TEXT NOT NULL,
          requested INTEGER NOT NULL,
          drawn INTEGER NOT NULL,
          detail TEXT,
          PRIMARY KEY(settings_id, query_id)
        );

        CREATE TABLE IF NOT EXISTS draws (
          settings_id INTEGER NOT NULL,
          query_id INTEGER NOT NULL,
          draw_rank INTEGER NOT NULL,
          article_id INTEGER NOT NULL,
          citation_count INTEGER NOT NULL,
          similarity REAL NOT NULL,
          score REAL NOT NULL,
          page INTEGER NOT NULL,
          PRIMARY KEY(settings_id, query_id, draw_rank)
        );

        CREATE TABLE IF NOT EXISTS batches (
          batch_index INTEGER PRIMARY KEY,
          state TEXT NOT NULL,
          first_query_id INTEGER NOT NULL,
          query_count INTEGER NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS distributions (
          settings_key TEXT NOT NULL,
          citation_count INTEGER NOT NULL,
          frequency INTEGER NOT NULL,
          PRIMARY KEY(settings_key, citation_count)
        );

        CREATE INDEX IF NOT EXISTS idx_units_query_id ON units(query_id);
        ",
    )?;

    connection.execute(
        "
        INSERT INTO metadata(key, value) VALUES('schema_version', ?1)
        ON CONFLICT(key) DO UPDATE SET value=excluded.value
        ",
        [EXPERIMENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

fn write_batch_rows(
    tx: &Transaction<'_>,
    outcomes: &[UnitOutcome],
    batch_index: u64,
) -> Result<BatchWriteStats> {
    let mut unit_statement = tx.prepare_cached(
        "
        INSERT INTO units(settings_id, query_id, batch_index, status, requested, drawn, detail)
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
    )?;
    let mut draw_statement = tx.prepare_cached(
        "
        INSERT INTO draws(settings_id, query_id, draw_rank, article_id, citation_count, similarity, score, page)
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ",
    )?;

    let batch_index = to_sql_id(batch_index)?;
    let mut stats = BatchWriteStats::default();
    for outcome in outcomes {
        match outcome {
            UnitOutcome::Drawn(record) => {
                let query_id = to_sql_id(record.global_query_id)?;
                let status = if record.underfilled {
                    stats.units_underfilled += 1;
                    STATUS_UNDERFILLED
                } else {
                    stats.units_completed += 1;
                    STATUS_COMPLETED
                };
                let detail = record.underfilled.then(|| {
                    format!(
                        "drew {} of {} requested articles",
                        record.draws.len(),
                        record.requested
                    )
                });
                unit_statement
                    .execute(params![
                        record.settings_id,
                        query_id,
                        batch_index,
                        status,
                        record.requested as i64,
                        record.draws.len() as i64,
                        detail,
                    ])
                    .with_context(|| {
                        format!(
                            "failed to store unit (settings {}, query {})",
                            record.settings_id, record.global_query_id
                        )
                    })?;

                for draw in &record.draws {
                    draw_statement.execute(params![
                        record.settings_id,
                        query_id,
                        draw.rank as i64,
                        to_sql_id(draw.article_id)?,
                        to_sql_id(draw.citation_count)?,
                        draw.similarity,
                        draw.score,
                        draw.page as i64,
                    ])?;
                    stats.draws_written += 1;
                }
            }
            UnitOutcome::Failed {
                settings_id,
                global_query_id,
                requested,
                reason,
            } => {
                unit_statement
                    .execute(params![
                        settings_id,
                        to_sql_id(*global_query_id)?,
                        batch_index,
                        STATUS_FAILED,
                        *requested as i64,
                        0_i64,
                        reason,
                    ])
                    .with_context(|| {
                        format!(
                            "failed to store failed unit (settings {settings_id}, query {global_query_id})"
                        )
                    })?;
                stats.units_failed += 1;
            }
        }
    }

    Ok(stats)
}

fn advance_checkpoint(tx: &Transaction<'_>, checkpoint: &Checkpoint) -> Result<()> {
    let fingerprints = &checkpoint.fingerprints;
    tx.execute(
        "
        INSERT INTO checkpoint(
          id, phase, queries_completed, last_query_id, batches_completed,
          settings_sha256, queries_sha256, normalizer_checksum, base_seed, candidate_limit, updated_at
        )
        VALUES(1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(id) DO UPDATE SET
          phase=excluded.phase,
          queries_completed=excluded.queries_completed,
          last_query_id=excluded.last_query_id,
          batches_completed=excluded.batches_completed,
          settings_sha256=excluded.settings_sha256,
          queries_sha256=excluded.queries_sha256,
          normalizer_checksum=excluded.normalizer_checksum,
          base_seed=excluded.base_seed,
          candidate_limit=excluded.candidate_limit,
          updated_at=excluded.updated_at
        ",
        params![
            checkpoint.phase.as_str(),
            to_sql_id(checkpoint.queries_completed)?,
            checkpoint.last_query_id.map(to_sql_id).transpose()?,
            to_sql_id(checkpoint.batches_completed)?,
            fingerprints.settings_sha256,
            fingerprints.queries_sha256,
            fingerprints.normalizer_checksum,
            fingerprints.base_seed.to_string(),
            fingerprints.candidate_limit as i64,
            now_utc_string(),
        ],
    )?;
    Ok(())
}
