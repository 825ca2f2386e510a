use anyhow::{Result, bail};

use crate::model::InputFingerprints;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    Running,
    Checkpointed,
    Resumed,
    Finished,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Checkpointed => "checkpointed",
            Self::Resumed => "resumed",
            Self::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        Ok(match value {
            "not_started" => Self::NotStarted,
            "running" => Self::Running,
            "checkpointed" => Self::Checkpointed,
            "resumed" => Self::Resumed,
            "finished" => Self::Finished,
            other => bail!("unknown run phase '{other}' in checkpoint"),
        })
    }

    pub fn transition(self, next: Self) -> Result<Self> {
        let allowed = matches!(
            (self, next),
            (Self::NotStarted, Self::Running)
                | (Self::Running, Self::Checkpointed)
                | (Self::Running, Self::Resumed)
                | (Self::Running, Self::Finished)
                | (Self::Checkpointed, Self::Checkpointed)
                | (Self::Checkpointed, Self::Resumed)
                | (Self::Checkpointed, Self::Finished)
                | (Self::Resumed, Self::Checkpointed)
                | (Self::Resumed, Self::Resumed)
                | (Self::Resumed, Self::Finished)
                | (Self::Finished, Self::Finished)
        );
        if !allowed {
            bail!(
                "illegal run phase transition {} -> {}",
                self.as_str(),
                next.as_str()
            );
        }
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    InProgress,
    Completed,
}

impl BatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        Ok(match value {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            other => bail!("unknown batch state '{other}' in experiment store"),
        })
    }

    pub fn transition(self, next: Self) -> Result<Self> {
        match (self, next) {
            (Self::Pending, Self::InProgress)
            | (Self::InProgress, Self::InProgress)
            | (Self::InProgress, Self::Completed) => Ok(next),
            _ => bail!(
                "illegal batch state transition {} -> {}",
                self.as_str(),
                next.as_str()
            ),
        }
    }
}

/// Persisted cursor over the query-major enumeration. Everything before
/// `queries_completed` has durable unit rows; nothing after it does.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub phase: RunPhase,
    pub queries_completed: u64,
    pub last_query_id: Option<u64>,
    pub batches_completed: u64,
    pub fingerprints: InputFingerprints,
}

impl Checkpoint {
    pub fn fresh(fingerprints: InputFingerprints) -> Self {
        Self {
            phase: RunPhase::NotStarted,
            queries_completed: 0,
            last_query_id: None,
            batches_completed: 0,
            fingerprints,
        }
    }

    pub fn advanced(&self, queries: u64, last_query_id: Option<u64>) -> Result<Self> {
        let mut next = self.clone();
        next.phase = self.phase.transition(RunPhase::Checkpointed)?;
        next.queries_completed += queries;
        next.last_query_id = last_query_id.or(self.last_query_id);
        next.batches_completed += 1;
        Ok(next)
    }

    pub fn fingerprint_mismatches(&self, current: &InputFingerprints) -> Vec<String> {
        let stored = &self.fingerprints;
        let mut out = Vec::<String>::new();
        if stored.settings_sha256 != current.settings_sha256 {
            out.push(format!(
                "settings file sha256 {} != {}",
                current.settings_sha256, stored.settings_sha256
            ));
        }
        if stored.queries_sha256 != current.queries_sha256 {
            out.push(format!(
                "query set sha256 {} != {}",
                current.queries_sha256, stored.queries_sha256
            ));
        }
        if stored.normalizer_checksum != current.normalizer_checksum {
            out.push(format!(
                "normalizer checksum {} != {}",
                current.normalizer_checksum, stored.normalizer_checksum
            ));
        }
        if stored.base_seed != current.base_seed {
            out.push(format!(
                "base seed {} != {}",
                current.base_seed, stored.base_seed
            ));
        }
        if stored.candidate_limit != current.candidate_limit {
            out.push(format!(
                "candidate limit {} != {}",
                current.candidate_limit, stored.candidate_limit
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHASES: [RunPhase; 5] = [
        RunPhase::NotStarted,
        RunPhase::Running,
        RunPhase::Checkpointed,
        RunPhase::Resumed,
        RunPhase::Finished,
    ];

    fn fingerprints() -> InputFingerprints {
        InputFingerprints {
            settings_sha256: "settings".to_string(),
            queries_sha256: "queries".to_string(),
            normalizer_checksum: "normalizer".to_string(),
            base_seed: 42,
            candidate_limit: 250,
        }
    }

    #[test]
    fn run_phase_accepts_only_forward_edges() {
        assert_eq!(
            RunPhase::NotStarted.transition(RunPhase::Running).expect("start"),
            RunPhase::Running
        );
        assert!(RunPhase::Checkpointed.transition(RunPhase::Resumed).is_ok());
        assert!(RunPhase::Resumed.transition(RunPhase::Resumed).is_ok());
        assert!(RunPhase::Resumed.transition(RunPhase::Finished).is_ok());
        assert!(RunPhase::Finished.transition(RunPhase::Finished).is_ok());

        assert!(RunPhase::Finished.transition(RunPhase::Running).is_err());
        assert!(RunPhase::Finished.transition(RunPhase::Checkpointed).is_err());
        assert!(RunPhase::NotStarted.transition(RunPhase::Checkpointed).is_err());
        assert!(RunPhase::NotStarted.transition(RunPhase::Finished).is_err());
        for phase in PHASES {
            assert!(phase.transition(RunPhase::NotStarted).is_err());
        }
    }

    #[test]
    fn run_phase_names_round_trip() {
        for phase in PHASES {
            assert_eq!(RunPhase::parse(phase.as_str()).expect("parse"), phase);
        }
        assert!(RunPhase::parse("paused").is_err());
    }

    #[test]
    fn batch_state_cannot_skip_in_progress() {
        assert!(BatchState::Pending.transition(BatchState::Completed).is_err());
        assert!(BatchState::Completed.transition(BatchState::InProgress).is_err());
        assert!(BatchState::InProgress.transition(BatchState::Pending).is_err());

        let state = BatchState::Pending
            .transition(BatchState::InProgress)
            .expect("start");
        let state = state.transition(BatchState::InProgress).expect("restart");
        assert_eq!(
            state.transition(BatchState::Completed).expect("complete"),
            BatchState::Completed
        );
        assert_eq!(BatchState::parse("in_progress").expect("parse"), BatchState::InProgress);
        assert!(BatchState::parse("done").is_err());
    }

    #[test]
    fn advancing_moves_the_cursor_and_counts_batches() {
        let mut checkpoint = Checkpoint::fresh(fingerprints());
        checkpoint.phase = checkpoint.phase.transition(RunPhase::Running).expect("running");

        let first = checkpoint.advanced(3, Some(9)).expect("first batch");
        assert_eq!(first.phase, RunPhase::Checkpointed);
        assert_eq!(first.queries_completed, 3);
        assert_eq!(first.last_query_id, Some(9));
        assert_eq!(first.batches_completed, 1);

        let second = first.advanced(0, None).expect("empty batch");
        assert_eq!(second.queries_completed, 3);
        assert_eq!(second.last_query_id, Some(9));
        assert_eq!(second.batches_completed, 2);
    }

    #[test]
    fn finished_or_unstarted_checkpoint_cannot_advance() {
        let fresh = Checkpoint::fresh(fingerprints());
        assert!(fresh.advanced(1, Some(1)).is_err());

        let mut finished = fresh;
        finished.phase = RunPhase::Finished;
        let err = finished.advanced(1, Some(1)).expect_err("finished run");
        assert!(err.to_string().contains("finished -> checkpointed"));
    }

    #[test]
    fn fingerprint_mismatches_name_every_changed_input() {
        let checkpoint = Checkpoint::fresh(fingerprints());
        assert!(checkpoint.fingerprint_mismatches(&fingerprints()).is_empty());

        let mut current = fingerprints();
        current.base_seed = 7;
        current.candidate_limit = 100;
        let mismatches = checkpoint.fingerprint_mismatches(&current);
        assert_eq!(mismatches.len(), 2);
        assert!(mismatches[0].starts_with("base seed 7 != 42"));
        assert!(mismatches[1].starts_with("candidate limit 100 != 250"));
    }
}
