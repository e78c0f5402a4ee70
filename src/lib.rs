//! `probecov` turns raw execution-probe dumps into per-test, per-line coverage.
//!
//! The pipeline has five stages, each its own module:
//!
//! 1. [`reader`] decodes the binary exec dump stream into session and execution events.
//! 2. [`analysis`] reconstructs per-method control flow of an instrumented class ([`class`]) and maps every probe id
//!    to a source line range.
//! 3. [`cache`] keys those analyses by content hash so a class dumped by thousands of test executions is analyzed
//!    once.
//! 4. [`aggregate`] folds probe hits into compacted per-test, per-file line ranges.
//! 5. [`report`] joins the coverage with external test metadata into the [`TestwiseCoverageReport`] model.
//!
//! [`process::Processor`] wires the stages together into one streaming fold.
//!
//! [`reader`]: ./reader/index.html
//! [`analysis`]: ./analysis/index.html
//! [`class`]: ./class/index.html
//! [`cache`]: ./cache/index.html
//! [`aggregate`]: ./aggregate/index.html
//! [`report`]: ./report/index.html
//! [`process::Processor`]: ./process/struct.Processor.html
//! [`TestwiseCoverageReport`]: ./report/struct.TestwiseCoverageReport.html

#![recursion_limit = "128"] // needed for error_chain.

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
#[cfg(feature = "serde")]
extern crate serde;
extern crate byteorder;
extern crate fixedbitset;
extern crate num_traits; // required for shawshank
extern crate shawshank;

pub mod aggregate;
pub mod analysis;
pub mod cache;
pub mod class;
pub mod error;
pub mod intern;
pub mod process;
pub mod raw;
pub mod reader;
pub mod report;

pub use aggregate::{Aggregator, FileCoverage, TestCoverage};
pub use analysis::{ClassProbeMap, LineRange, analyze};
pub use cache::{ClassPool, DuplicatePolicy, ProbeCache};
pub use class::ClassFile;
pub use error::{Error, ErrorKind, Result};
pub use intern::{Interner, Symbol};
pub use process::{Processed, Processor, Summary};
pub use raw::{ClassId, Event, ExecutionData, Session};
pub use reader::Reader;
pub use report::{TestDetails, TestExecution, TestResult, TestwiseCoverageReport, assemble};
