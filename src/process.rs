//! The streaming fold over exec dump streams.
//!
//! A [`Processor`] owns the whole pipeline state of one report-generation invocation: the interner, the class pool,
//! the probe cache and the aggregator. Dump files are folded one stream at a time with [`process`]; each decoded
//! event is consumed immediately, so memory stays proportional to the number of analyzed classes and covered lines,
//! not to the dump size.
//!
//! Failure scope follows the block structure. A malformed stream aborts [`process`] for that stream only; everything
//! already folded (including by earlier streams) stays usable. A malformed execution record is dropped with a
//! warning and a [`Summary`] counter, never aborting its stream.
//!
//! [`Processor`]: ./struct.Processor.html
//! [`process`]: ./struct.Processor.html#method.process
//! [`Summary`]: ./struct.Summary.html

use aggregate::{Aggregator, TestCoverage};
use cache::{ClassPool, DuplicatePolicy, ProbeCache};
use error::*;
use intern::{Interner, Symbol};
use raw::{ClassId, Event, ExecutionData, Session};
use reader::Reader;

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

//----------------------------------------------------------------------------------------------------------------------
//{{{ Summary

/// Counters describing what the fold did and what it had to drop. Returned by [`Processor::finish`] so callers can
/// surface data-quality problems without scraping logs.
///
/// [`Processor::finish`]: ./struct.Processor.html#method.finish
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub struct Summary {
    /// Classes successfully analyzed.
    pub analyzed_classes: usize,
    /// Classes whose bytes were malformed or whose probe numbering was inconsistent.
    pub skipped_classes: usize,
    /// Executed classes with no registered class file.
    pub missing_classes: usize,
    /// Classes suppressed by the duplicate-name policy.
    pub duplicate_classes: usize,
    /// Execution records dropped (outside a session, probe count mismatch, or unanalyzable class).
    pub dropped_records: usize,
    /// Execution records attributed to the reserved non-test session.
    pub non_test_records: usize,
    /// How many of the dropped records were probe count mismatches.
    pub probe_count_mismatches: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "analyzed {} classes ({} skipped, {} missing, {} duplicates), dropped {} records ({} probe count mismatches), ignored {} non-test records",
            self.analyzed_classes,
            self.skipped_classes,
            self.missing_classes,
            self.duplicate_classes,
            self.dropped_records,
            self.probe_count_mismatches,
            self.non_test_records
        )
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Processor

/// Which session the execution records decoded next belong to.
#[derive(Copy, Clone, Debug)]
enum State {
    /// No `SESSIONINFO` block seen yet in any stream.
    Idle,
    InSession(Session),
}

/// The pipeline state of one report-generation invocation.
#[derive(Default)]
pub struct Processor {
    interner: Interner,
    pool: ClassPool,
    cache: ProbeCache,
    aggregator: Aggregator,
    state: State,
    dropped_records: usize,
    non_test_records: usize,
    probe_count_mismatches: usize,
}

impl Default for State {
    fn default() -> State {
        State::Idle
    }
}

/// Everything one invocation produced: the per-test coverage in canonical form, the counters, and the interner
/// needed to resolve the symbols in the coverage keys.
pub struct Processed {
    pub interner: Interner,
    pub coverage: BTreeMap<Symbol, TestCoverage>,
    pub summary: Summary,
}

impl Processor {
    pub fn new(policy: DuplicatePolicy) -> Processor {
        Processor {
            cache: ProbeCache::new(policy),
            ..Processor::default()
        }
    }

    /// Registers the instrumented class file `bytes`, making its probes attributable. Classes may be registered at
    /// any point before [`finish`], in any order relative to the dump streams mentioning them — but an execution
    /// record whose class is still unregistered when the record is folded is dropped, so registering everything
    /// first is the normal call order.
    ///
    /// [`finish`]: #method.finish
    pub fn add_class(&mut self, bytes: Vec<u8>) -> ClassId {
        self.pool.add(bytes)
    }

    /// Folds one exec dump stream.
    ///
    /// # Errors
    ///
    /// Format problems (bad magic, unknown block tag, truncation) abort this stream; the processor itself stays
    /// usable and further streams can still be folded. Under [`DuplicatePolicy::Fail`] a duplicate class name also
    /// surfaces here.
    ///
    /// [`DuplicatePolicy::Fail`]: ../cache/enum.DuplicatePolicy.html#variant.Fail
    pub fn process<R: Read>(&mut self, stream: R) -> Result<()> {
        // sessions do not span streams.
        self.state = State::Idle;
        let mut reader = Reader::new(stream)?;
        while let Some(event) = reader.read_event(&mut self.interner)? {
            match event {
                Event::SessionStart(session) => {
                    trace!("session {:?} [{} .. {}]", &self.interner[session.id], session.start, session.end);
                    self.state = State::InSession(session);
                },
                Event::ClassExecution(data) => {
                    if let Err(error) = self.record(data) {
                        let isolated = match *error.kind() {
                            ErrorKind::ExecutionOutsideSession => true,
                            ErrorKind::ProbeCountMismatch(..) => {
                                self.probe_count_mismatches += 1;
                                true
                            },
                            _ => false,
                        };
                        if !isolated {
                            return Err(error);
                        }
                        warn!("dropped execution record: {}", error);
                        self.dropped_records += 1;
                    }
                },
            }
        }
        Ok(())
    }

    /// Folds one execution record into the aggregator.
    fn record(&mut self, data: ExecutionData) -> Result<()> {
        let session = match self.state {
            State::Idle => bail!(ErrorKind::ExecutionOutsideSession),
            State::InSession(session) => session,
        };
        if !session.is_test() {
            trace!("class {} executed outside any test", data.class_id);
            self.non_test_records += 1;
            return Ok(());
        }

        let pool = &mut self.pool;
        let map = self.cache.lookup_or_analyze(data.class_id, &mut self.interner, || pool.take(data.class_id))?;
        let applied = self.aggregator.apply(session.id, data.class_id, &data.probes, map.as_ref().map(|rc| &**rc), &self.interner)?;
        if !applied {
            self.dropped_records += 1;
        }
        Ok(())
    }

    /// Finishes the invocation: compacts the accumulated coverage and returns it with the counters.
    pub fn finish(self) -> Processed {
        let summary = Summary {
            analyzed_classes: self.cache.analyzed_classes(),
            skipped_classes: self.cache.failed_classes(),
            missing_classes: self.cache.missing_classes(),
            duplicate_classes: self.cache.duplicate_classes(),
            dropped_records: self.dropped_records,
            non_test_records: self.non_test_records,
            probe_count_mismatches: self.probe_count_mismatches,
        };
        debug!("fold finished: {}", summary);
        Processed {
            interner: self.interner,
            coverage: self.aggregator.into_coverage(),
            summary,
        }
    }
}

//}}}
