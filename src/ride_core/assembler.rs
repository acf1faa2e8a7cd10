//! Ride boundary state machine
//!
//! ```text
//! WaitingForRide --RideStart--> Collecting(ride_id = previous + 1)
//! Collecting     --record-----> Collecting (append)
//! Collecting     --RideStart--> Collecting (unterminated ride discarded)
//! Collecting     --RideEnd----> WaitingForRide (commit + notify, or discard lost ride)
//! ```
//!
//! The assembler never polls a stream itself. The driving loop feeds it one
//! record at a time, which keeps it testable without a broker.

use super::batch::build_batch;
use super::parser::{ClassifiedRecord, RecordKind};
use super::recovery::RecoveryPlan;
use crate::notify::NotificationPort;
use crate::sink::{CommitSink, SinkError};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Active,
    /// Ride will never be committed; records are not retained
    Discarded,
}

#[derive(Debug, Clone)]
pub struct RideBuffer {
    pub ride_id: i64,
    pub records: Vec<ClassifiedRecord>,
    pub state: BufferState,
}

impl RideBuffer {
    fn new(ride_id: i64, state: BufferState) -> Self {
        Self {
            ride_id,
            records: Vec::new(),
            state,
        }
    }

    fn push(&mut self, record: &ClassifiedRecord) {
        if self.state == BufferState::Discarded {
            return;
        }
        let mut record = record.clone();
        if let RecordKind::Telemetry(t) = record.kind {
            record.kind = RecordKind::Telemetry(t.normalized());
        }
        self.records.push(record);
    }
}

#[derive(Debug)]
enum AssemblerState {
    WaitingForRide,
    Collecting(RideBuffer),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerStats {
    pub rides_committed: u64,
    pub rides_discarded: u64,
    pub rows_committed: u64,
}

pub struct RideAssembler {
    state: AssemblerState,
    /// Id of the most recently opened ride
    previous_ride_id: i64,
    lost_ride_id: Option<i64>,
    /// Records dropped while the lost ride was open
    lost_records_seen: usize,
    sink: Box<dyn CommitSink>,
    notifier: Arc<dyn NotificationPort>,
    stats: AssemblerStats,
}

impl RideAssembler {
    /// Start waiting for a ride boundary. The next `RideStart` opens `previous_ride_id + 1`.
    pub fn new(
        sink: Box<dyn CommitSink>,
        notifier: Arc<dyn NotificationPort>,
        previous_ride_id: i64,
    ) -> Self {
        Self {
            state: AssemblerState::WaitingForRide,
            previous_ride_id,
            lost_ride_id: None,
            lost_records_seen: 0,
            sink,
            notifier,
            stats: AssemblerStats::default(),
        }
    }

    /// Resume after a restart. Consumption may begin mid-ride, so the ride in
    /// progress is assigned `plan.starting_ride_id` and marked lost.
    ///
    /// If a `RideStart` arrives before any record of that ride, consumption
    /// began on a boundary and the new ride takes `plan.starting_ride_id` itself.
    pub fn resume(
        sink: Box<dyn CommitSink>,
        notifier: Arc<dyn NotificationPort>,
        plan: &RecoveryPlan,
    ) -> Self {
        Self {
            state: AssemblerState::Collecting(RideBuffer::new(
                plan.starting_ride_id,
                BufferState::Discarded,
            )),
            previous_ride_id: plan.starting_ride_id,
            lost_ride_id: Some(plan.lost_ride_id),
            lost_records_seen: 0,
            sink,
            notifier,
            stats: AssemblerStats::default(),
        }
    }

    /// Feed one record through the state machine.
    ///
    /// A sink failure leaves the open ride untouched, so delivering the same
    /// `RideEnd` again retries the commit.
    pub async fn process(&mut self, record: &ClassifiedRecord) -> Result<(), SinkError> {
        match &record.kind {
            RecordKind::RideStart => self.open_ride(),
            RecordKind::RideEnd => match self.state {
                AssemblerState::Collecting(_) => self.finish_ride().await?,
                AssemblerState::WaitingForRide => {
                    log::debug!("End of ride seen while no ride is open, ignoring");
                }
            },
            _ => {
                if let AssemblerState::Collecting(buffer) = &mut self.state {
                    if buffer.state == BufferState::Discarded {
                        self.lost_records_seen += 1;
                    }
                    buffer.push(record);
                }
            }
        }
        Ok(())
    }

    fn open_ride(&mut self) {
        if let AssemblerState::Collecting(previous) = &self.state {
            let untouched_lost_ride = previous.state == BufferState::Discarded
                && self.lost_ride_id == Some(previous.ride_id)
                && self.lost_records_seen == 0;

            if untouched_lost_ride {
                // Nothing of the lost ride was observed, so its id is free
                let ride_id = previous.ride_id;
                self.lost_ride_id = None;
                self.previous_ride_id = ride_id;
                log::info!("🚴 New ride with id: {}. Collecting logs...", ride_id);
                self.state = AssemblerState::Collecting(RideBuffer::new(ride_id, BufferState::Active));
                return;
            }

            match previous.state {
                BufferState::Active => log::warn!(
                    "⚠️  Ride {} never ended, discarding {} records",
                    previous.ride_id,
                    previous.records.len()
                ),
                BufferState::Discarded => {
                    log::info!("🗑️  Discarding partial ride {}", previous.ride_id)
                }
            }
            self.stats.rides_discarded += 1;
        }

        self.previous_ride_id += 1;
        let ride_id = self.previous_ride_id;
        let state = if self.lost_ride_id == Some(ride_id) {
            BufferState::Discarded
        } else {
            BufferState::Active
        };

        log::info!("🚴 New ride with id: {}. Collecting logs...", ride_id);
        self.state = AssemblerState::Collecting(RideBuffer::new(ride_id, state));
    }

    async fn finish_ride(&mut self) -> Result<(), SinkError> {
        let AssemblerState::Collecting(buffer) = &self.state else {
            return Ok(());
        };

        if buffer.state == BufferState::Discarded || self.lost_ride_id == Some(buffer.ride_id) {
            log::info!("🗑️  Ride {} started before consumption began, discarding", buffer.ride_id);
            self.stats.rides_discarded += 1;
            self.state = AssemblerState::WaitingForRide;
            return Ok(());
        }

        let batch = build_batch(buffer);
        let rows = self.sink.write_batch(&batch).await?;

        log::info!(
            "✅ Ride {} ended. {} rows appended to {}",
            batch.ride_id,
            rows,
            self.sink.backend_type()
        );
        self.notifier.notify(rows);

        self.stats.rides_committed += 1;
        self.stats.rows_committed += rows as u64;
        self.state = AssemblerState::WaitingForRide;
        Ok(())
    }

    /// Ride currently being collected, if any
    pub fn current_ride_id(&self) -> Option<i64> {
        match &self.state {
            AssemblerState::Collecting(buffer) => Some(buffer.ride_id),
            AssemblerState::WaitingForRide => None,
        }
    }

    pub fn previous_ride_id(&self) -> i64 {
        self.previous_ride_id
    }

    pub fn buffered_records(&self) -> usize {
        match &self.state {
            AssemblerState::Collecting(buffer) => buffer.records.len(),
            AssemblerState::WaitingForRide => 0,
        }
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Close the sink. Any open ride is dropped with it.
    pub async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(ride_id) = self.current_ride_id() {
            log::info!("Ride {} still open at shutdown, not committed", ride_id);
        }
        self.sink.close().await
    }
}
