//! Startup recovery from the committed rides table

use crate::sink::{CommitSink, SinkError, TableRef};

/// Where ride numbering resumes after a restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPlan {
    pub last_committed_ride_id: i64,
    /// Id given to the ride that may already be in progress when consumption begins
    pub starting_ride_id: i64,
    /// Ride whose records must not be committed because its start was never seen
    pub lost_ride_id: i64,
}

impl RecoveryPlan {
    pub fn from_checkpoint(last_committed_ride_id: i64) -> Self {
        let starting_ride_id = last_committed_ride_id + 1;
        Self {
            last_committed_ride_id,
            starting_ride_id,
            lost_ride_id: starting_ride_id,
        }
    }
}

pub struct RecoveryCoordinator {
    table: TableRef,
}

impl RecoveryCoordinator {
    pub fn new(table: TableRef) -> Self {
        Self { table }
    }

    /// Read the checkpoint once. A missing table counts as "nothing committed".
    pub async fn initialize(&self, sink: &dyn CommitSink) -> Result<RecoveryPlan, SinkError> {
        let last = sink.max_committed_ride_id(&self.table).await?;
        let plan = RecoveryPlan::from_checkpoint(last);

        log::info!(
            "🔁 Recovery: last committed ride in {} is {}, resuming at {} (ride {} discarded if already under way)",
            self.table,
            plan.last_committed_ride_id,
            plan.starting_ride_id,
            plan.lost_ride_id
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SqliteCommitSink;
    use tempfile::TempDir;

    #[test]
    fn test_plan_from_checkpoint() {
        let plan = RecoveryPlan::from_checkpoint(6);
        assert_eq!(plan.starting_ride_id, 7);
        assert_eq!(plan.lost_ride_id, 7);
    }

    #[tokio::test]
    async fn test_initialize_on_fresh_database() {
        let dir = TempDir::new().unwrap();
        let table = TableRef::new("ride_staging", "ride_logs");
        let sink = SqliteCommitSink::new(dir.path().join("rides.db"), table.clone()).unwrap();

        // Ask about a table the sink never created
        let plan = RecoveryCoordinator::new(table.sibling("archive"))
            .initialize(&sink)
            .await
            .unwrap();

        assert_eq!(plan.last_committed_ride_id, 0);
        assert_eq!(plan.starting_ride_id, 1);
    }
}
