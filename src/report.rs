//! The testwise coverage report model.
//!
//! The [`TestwiseCoverageReport`] is the format-independent output of the pipeline: per test, the externally supplied
//! metadata and execution result joined with the aggregated coverage, with every line range already formatted. It
//! serializes via serde into the camelCase JSON shape consumed by external services; what to do with the serialized
//! form (upload, write to disk) is out of scope.
//!
//! Symbols are resolved back into strings here, at the very end of the pipeline, so the earlier stages never touch
//! string comparisons.
//!
//! [`TestwiseCoverageReport`]: ./struct.TestwiseCoverageReport.html

use error::*;
use process::Processed;

#[cfg(feature = "serde")]
use serde::Serialize;

use std::collections::BTreeMap;

//----------------------------------------------------------------------------------------------------------------------
//{{{ External inputs: test metadata and execution results

/// The verdict of one test execution, as reported by the external test runner.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum TestResult {
    Passed,
    Ignored,
    Skipped,
    Failure,
    Error,
}

/// Static metadata of one test, supplied by the external test discovery.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TestDetails {
    /// The identifier joining all inputs, and the session id the dump producer uses for this test.
    pub uniform_path: String,
    /// Path of the file defining the test, when known.
    pub source_path: Option<String>,
    /// Content hash or revision of the test definition, when known.
    pub content: Option<String>,
}

/// The outcome of one test execution, supplied by the external test runner.
#[derive(Clone, PartialEq, Debug)]
pub struct TestExecution {
    pub uniform_path: String,
    /// Wall-clock duration in seconds.
    pub duration: f64,
    pub result: TestResult,
    /// Failure or error message, if any.
    pub message: Option<String>,
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Report model

/// The covered lines of one file, formatted.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct FileCoverageInfo {
    /// Name of the source file. Absent when the classes covering it carried no source file metadata.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub file_name: Option<String>,

    /// The covered lines in canonical form, e.g. `1-5,7,9-11`.
    pub covered_lines: String,
}

/// The coverage one test produced under one path (package).
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PathCoverage {
    /// The package path, e.g. `com/example`. Empty for the default package.
    pub path: String,

    /// Per-file coverage, ordered by file name.
    pub files: Vec<FileCoverageInfo>,
}

/// Everything known about one test: metadata, execution result and coverage, joined by uniform path.
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TestInfo {
    pub uniform_path: String,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub source_path: Option<String>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub content: Option<String>,

    /// Wall-clock duration in seconds, when an execution result was supplied.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub duration: Option<f64>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub result: Option<TestResult>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub message: Option<String>,

    /// Coverage grouped by path, ordered. Empty for tests that appear in the metadata but produced no coverage.
    pub paths: Vec<PathCoverage>,
}

/// The assembled report.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct TestwiseCoverageReport {
    /// Whether this report is an incremental delta rather than the full authoritative set of tests. Set by the
    /// caller; this crate only carries it through.
    pub partial: bool,

    /// One entry per test, ordered by uniform path.
    pub tests: Vec<TestInfo>,
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ assemble

/// Joins the fold's coverage with externally supplied test metadata and execution results into the final report.
///
/// The join key is the test's uniform path. Tests present in `details` or `executions` but without observed coverage
/// still appear, with an empty path list; coverage for tests absent from the metadata is kept too.
///
/// # Errors
///
/// Returns [`EmptyReport`] if the fold analyzed zero classes, i.e. every execution record was dropped and the report
/// would misrepresent the run as "nothing covered".
///
/// [`EmptyReport`]: ../error/enum.ErrorKind.html#variant.EmptyReport
pub fn assemble(processed: &Processed, details: &[TestDetails], executions: &[TestExecution], partial: bool) -> Result<TestwiseCoverageReport> {
    ensure!(processed.summary.analyzed_classes > 0, ErrorKind::EmptyReport);

    let mut tests: BTreeMap<&str, TestInfo> = BTreeMap::new();

    for detail in details {
        let info = test_info(&mut tests, &detail.uniform_path);
        info.source_path = detail.source_path.clone();
        info.content = detail.content.clone();
    }
    for execution in executions {
        let info = test_info(&mut tests, &execution.uniform_path);
        info.duration = Some(execution.duration);
        info.result = Some(execution.result);
        info.message = execution.message.clone();
    }

    for (&test, coverage) in &processed.coverage {
        // group by path string; symbol order is interning order, not path order.
        let mut paths: BTreeMap<&str, BTreeMap<Option<&str>, String>> = BTreeMap::new();
        for (&(path, file), lines) in coverage {
            let file = file.map(|file| &processed.interner[file]);
            paths.entry(&processed.interner[path]).or_insert_with(BTreeMap::new).insert(file, lines.to_string());
        }
        let info = test_info(&mut tests, &processed.interner[test]);
        info.paths = paths
            .into_iter()
            .map(|(path, files)| PathCoverage {
                path: path.to_owned(),
                files: files
                    .into_iter()
                    .map(|(file_name, covered_lines)| FileCoverageInfo {
                        file_name: file_name.map(str::to_owned),
                        covered_lines,
                    })
                    .collect(),
            })
            .collect();
    }

    debug!("assembled report over {} tests", tests.len());
    Ok(TestwiseCoverageReport {
        partial,
        tests: tests.into_iter().map(|(_, info)| info).collect(),
    })
}

fn test_info<'a, 'b>(tests: &'b mut BTreeMap<&'a str, TestInfo>, uniform_path: &'a str) -> &'b mut TestInfo {
    tests.entry(uniform_path).or_insert_with(|| TestInfo {
        uniform_path: uniform_path.to_owned(),
        ..TestInfo::default()
    })
}

//}}}
