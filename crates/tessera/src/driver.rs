//! The incomplete-operation driver.
//!
//! A read may need several submissions: the engine fills the bound buffers,
//! reports `Incomplete`, and expects to be resubmitted. When a round produced
//! no cell because the buffers cannot hold even one, the driver grows every
//! bound buffer through a [`ResizePolicy`] and tries again. Rounds that make
//! no progress for any other reason are resubmitted unchanged a bounded
//! number of times.

use crate::buffers::{Batch, BufferPart};
use crate::error::{Error, Result};
use crate::query::Query;
use crate::types::{IncompleteReason, QueryStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Chooses the new size of a buffer that was too small.
pub trait ResizePolicy {
    /// New capacity in bytes for `part` of `field`, currently `current` bytes.
    ///
    /// Proposals below `current` plus one element are raised to that.
    fn grow(&mut self, field: &str, part: BufferPart, current: usize) -> usize;
}

impl<F> ResizePolicy for F
where
    F: FnMut(&str, BufferPart, usize) -> usize,
{
    fn grow(&mut self, field: &str, part: BufferPart, current: usize) -> usize {
        self(field, part, current)
    }
}

/// Doubles every buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Doubling;

impl ResizePolicy for Doubling {
    fn grow(&mut self, _field: &str, _part: BufferPart, current: usize) -> usize {
        current.max(1).saturating_mul(2)
    }
}

/// Limits of a driven query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    /// Submissions that delivered no cell allowed before giving up with
    /// [`Error::RoundLimit`]. Rounds that deliver cells are never counted.
    pub max_rounds: u32,
    /// Consecutive rounds without progress and without a buffer-size reason
    /// allowed before giving up with [`Error::Stalled`].
    pub max_stalled_rounds: u32,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            max_rounds: 1024,
            max_stalled_rounds: 16,
        }
    }
}

impl DriverOptions {
    /// Sets the round limit.
    #[must_use]
    pub const fn max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Sets the stalled-round limit.
    #[must_use]
    pub const fn max_stalled_rounds(mut self, rounds: u32) -> Self {
        self.max_stalled_rounds = rounds;
        self
    }
}

/// One buffer replaced by a larger one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resize {
    /// Field name.
    pub field: String,
    /// Which buffer of the field.
    pub part: BufferPart,
    /// Old capacity in bytes.
    pub from: usize,
    /// New capacity in bytes.
    pub to: usize,
}

/// Outcome of one driver step.
#[derive(Debug)]
pub enum Progress {
    /// Some cells were produced and more remain.
    Partial(Batch),
    /// The last cells were produced.
    Complete(Batch),
    /// No cell fit; the listed buffers were grown.
    Resized(Vec<Resize>),
    /// No cell was produced for another reason; the query will be resubmitted
    /// as is.
    Retry(IncompleteReason),
}

/// Totals of a driven query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveSummary {
    /// Submissions.
    pub rounds: u32,
    /// Rounds that ended with buffers being grown.
    pub resizes: u32,
    /// Rounds that made no progress without a buffer-size reason.
    pub stalled_rounds: u32,
    /// Cells delivered per field.
    pub cells: BTreeMap<String, u64>,
}

/// Drives a read query to completion.
#[derive(Debug)]
pub struct IncompleteDriver<'q, P = Doubling> {
    query: &'q Query,
    policy: P,
    options: DriverOptions,
    summary: DriveSummary,
    stalled: u32,
    idle: u32,
    done: bool,
}

impl<'q> IncompleteDriver<'q, Doubling> {
    /// A driver that doubles buffers when they are too small.
    pub fn new(query: &'q Query) -> Self {
        Self::with_policy(query, Doubling)
    }
}

impl<'q, P: ResizePolicy> IncompleteDriver<'q, P> {
    /// A driver growing buffers with `policy`.
    pub fn with_policy(query: &'q Query, policy: P) -> Self {
        Self {
            query,
            policy,
            options: DriverOptions::default(),
            summary: DriveSummary::default(),
            stalled: 0,
            idle: 0,
            done: false,
        }
    }

    /// Replaces the limits.
    #[must_use]
    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    /// Submits once and interprets the result.
    pub fn step(&mut self) -> Result<Progress> {
        if self.done {
            return Err(Error::usage("driven query already completed"));
        }
        if self.idle >= self.options.max_rounds {
            return Err(Error::RoundLimit { rounds: self.idle });
        }
        self.summary.rounds += 1;

        let status = self.query.submit()?;
        match status {
            QueryStatus::Completed => {
                self.done = true;
                let batch = self.query.results()?;
                self.record(&batch);
                debug!(rounds = self.summary.rounds, "query completed");
                Ok(Progress::Complete(batch))
            }
            QueryStatus::Failed => {
                self.done = true;
                Err(Error::QueryFailed {
                    message: format!("engine reported a failed query after {} rounds", self.summary.rounds),
                })
            }
            QueryStatus::Incomplete => {
                let reason = self.query.status_details()?;
                let batch = self.query.results()?;
                if !batch.is_empty() {
                    self.stalled = 0;
                    self.record(&batch);
                    return Ok(Progress::Partial(batch));
                }
                self.idle += 1;
                if reason == IncompleteReason::UserBufferSize {
                    self.stalled = 0;
                    let resized = self.query.grow_buffers(&mut self.policy)?;
                    self.summary.resizes += 1;
                    debug!(round = self.summary.rounds, buffers = resized.len(), "grew buffers after empty round");
                    return Ok(Progress::Resized(resized));
                }
                self.stall(reason)
            }
            QueryStatus::InProgress | QueryStatus::Uninitialized => {
                self.idle += 1;
                self.stall(IncompleteReason::None)
            }
        }
    }

    fn stall(&mut self, reason: IncompleteReason) -> Result<Progress> {
        self.stalled += 1;
        self.summary.stalled_rounds += 1;
        if self.stalled >= self.options.max_stalled_rounds {
            return Err(Error::Stalled {
                rounds: self.stalled,
                reason,
            });
        }
        warn!(rounds = self.stalled, %reason, "query made no progress, resubmitting");
        Ok(Progress::Retry(reason))
    }

    fn record(&mut self, batch: &Batch) {
        for field in batch.fields() {
            *self.summary.cells.entry(field.name().to_owned()).or_default() += field.cell_count() as u64;
        }
    }

    /// Steps until the query completes, handing every non-empty batch to
    /// `sink`. The final batch is handed over even when empty.
    pub fn run<F>(mut self, mut sink: F) -> Result<DriveSummary>
    where
        F: FnMut(Batch) -> Result<()>,
    {
        loop {
            match self.step()? {
                Progress::Partial(batch) => sink(batch)?,
                Progress::Complete(batch) => {
                    sink(batch)?;
                    return Ok(self.summary);
                }
                Progress::Resized(_) | Progress::Retry(_) => {}
            }
        }
    }

    /// Totals so far.
    pub fn summary(&self) -> &DriveSummary {
        &self.summary
    }

    /// Returns true once the query completed.
    pub fn is_done(&self) -> bool {
        self.done
    }
}
