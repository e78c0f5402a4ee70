//! Aggregation of probe hits into per-test, per-file line coverage.
//!
//! The [`Aggregator`] is the accumulator of the streaming fold: every execution record of a test session is applied
//! as soon as it is decoded, merging the line ranges of its hit probes into the test's per-file coverage, and is
//! dropped afterwards. Coverage of one file is a list of [`LineRange`]s kept cheap to append to; it is only
//! [compacted] into its canonical form (sorted, non-overlapping, non-adjacent) when the fold finishes.
//!
//! [`Aggregator`]: ./struct.Aggregator.html
//! [`LineRange`]: ../analysis/struct.LineRange.html
//! [compacted]: ./struct.FileCoverage.html#method.compact

use analysis::{ClassProbeMap, LineRange};
use error::*;
use intern::{Interner, Symbol};
use raw::ClassId;

use fixedbitset::FixedBitSet;

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

//----------------------------------------------------------------------------------------------------------------------
//{{{ FileCoverage

/// The covered lines of one source file.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct FileCoverage {
    ranges: Vec<LineRange>,
}

impl FileCoverage {
    pub fn new() -> FileCoverage {
        FileCoverage::default()
    }

    /// Appends a range. Overlap with existing ranges is fine; it is resolved by [`compact`].
    ///
    /// [`compact`]: #method.compact
    pub fn push(&mut self, range: LineRange) {
        self.ranges.push(range);
    }

    /// Appends every range of `other`.
    pub fn merge(&mut self, other: FileCoverage) {
        self.ranges.extend(other.ranges);
    }

    /// Normalizes into the canonical form: sorted, with overlapping and adjacent ranges fused, so that equal covered
    /// sets compare and print equal. Idempotent.
    pub fn compact(&mut self) {
        self.ranges.sort();
        let mut compacted = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match compacted.last_mut() {
                Some(last) if range.touches(last) => last.adjust_to_contain(range.end()),
                _ => compacted.push(range),
            }
        }
        self.ranges = compacted;
    }

    /// The accumulated ranges, in canonical form only after [`compact`].
    ///
    /// [`compact`]: #method.compact
    pub fn ranges(&self) -> &[LineRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Prints the ranges in the report's `coveredLines` format, e.g. `1-5,7,9-11`.
impl fmt::Display for FileCoverage {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i != 0 {
                fmt.write_str(",")?;
            }
            write!(fmt, "{}", range)?;
        }
        Ok(())
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ TestCoverage & Aggregator

/// Where a file's coverage is filed: the package path of the classes in it, and the source file name when the
/// compiler recorded one.
pub type FileKey = (Symbol, Option<Symbol>);

/// The coverage one test accumulated, per file.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct TestCoverage {
    files: BTreeMap<FileKey, FileCoverage>,
}

impl TestCoverage {
    pub fn iter(&self) -> btree_map::Iter<FileKey, FileCoverage> {
        self.files.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn file_mut(&mut self, key: FileKey) -> &mut FileCoverage {
        self.files.entry(key).or_insert_with(FileCoverage::new)
    }

    fn compact(&mut self) {
        for coverage in self.files.values_mut() {
            coverage.compact();
        }
    }
}

impl<'a> IntoIterator for &'a TestCoverage {
    type Item = (&'a FileKey, &'a FileCoverage);
    type IntoIter = btree_map::Iter<'a, FileKey, FileCoverage>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The accumulator of the streaming fold, keyed by test (session) identifier.
#[derive(Default, Debug)]
pub struct Aggregator {
    tests: BTreeMap<Symbol, TestCoverage>,
}

impl Aggregator {
    pub fn new() -> Aggregator {
        Aggregator::default()
    }

    /// Merges one execution record into the coverage of `test`. Returns whether the record contributed; a record
    /// whose class was never analyzed contributes nothing and is dropped. Hit probes without line information merge
    /// nothing, and a record merging nothing creates no file entry at all.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeCountMismatch`] if the record carries fewer probe bits than the analyzed class declares
    /// (stale class files). Nothing is merged in that case; the coverage accumulated so far is untouched.
    ///
    /// [`ProbeCountMismatch`]: ../error/enum.ErrorKind.html#variant.ProbeCountMismatch
    pub fn apply(&mut self, test: Symbol, class_id: ClassId, probes: &FixedBitSet, map: Option<&ClassProbeMap>, interner: &Interner) -> Result<bool> {
        let map = match map {
            Some(map) => map,
            None => {
                debug!("dropping execution record for unanalyzed class {}", class_id);
                return Ok(false);
            },
        };
        ensure!(
            probes.len() >= map.probe_count(),
            ErrorKind::ProbeCountMismatch(interner[map.class_name()].to_owned(), map.probe_count(), probes.len())
        );

        let mut lines = FileCoverage::new();
        for probe in 0..map.probe_count() {
            if probes.contains(probe) {
                if let Some(range) = map.line_range(probe) {
                    lines.push(range);
                }
            }
        }
        // the (test, path, file) entry only exists once a line range actually arrives; an empty file entry must
        // never surface in the report.
        if !lines.is_empty() {
            self.tests.entry(test).or_insert_with(TestCoverage::default).file_mut((map.path(), map.source_file())).merge(lines);
        }
        Ok(true)
    }

    /// Finishes the fold, compacting every file's coverage into canonical form.
    pub fn into_coverage(self) -> BTreeMap<Symbol, TestCoverage> {
        let mut tests = self.tests;
        for test in tests.values_mut() {
            test.compact();
        }
        tests
    }
}

//}}}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis::analyze;
    use class::ClassFile;
    use class::MethodFlags;
    use class::testutil::ClassWriter;

    fn ranges(pairs: &[(u32, u32)]) -> FileCoverage {
        let mut coverage = FileCoverage::new();
        for &(start, end) in pairs {
            coverage.push(LineRange::between(start, end));
        }
        coverage
    }

    #[test]
    fn compaction_fuses_overlapping_and_adjacent_ranges() {
        let mut coverage = ranges(&[(9, 11), (1, 3), (4, 5), (2, 7)]);
        coverage.compact();
        assert_eq!(coverage.ranges(), &[LineRange::between(1, 7), LineRange::between(9, 11)]);
        assert_eq!(coverage.to_string(), "1-7,9-11");

        // idempotent
        let once = coverage.clone();
        coverage.compact();
        assert_eq!(coverage, once);
    }

    #[test]
    fn merging_then_compacting_fuses_across_sources() {
        let mut coverage = ranges(&[(1, 5), (8, 8)]);
        coverage.merge(ranges(&[(3, 9)]));
        coverage.compact();
        assert_eq!(coverage.ranges(), &[LineRange::between(1, 9)]);
        assert_eq!(coverage.to_string(), "1-9");
    }

    #[test]
    fn singleton_ranges_print_without_a_dash() {
        let mut coverage = ranges(&[(7, 7), (9, 11), (1, 5)]);
        coverage.compact();
        assert_eq!(coverage.to_string(), "1-5,7,9-11");
    }

    fn analyzed_class() -> (ClassProbeMap, Interner) {
        let bytes = ClassWriter::new("com/example/Foo", Some("Foo.java"), 2)
            .begin_method("run", MethodFlags::empty())
            .line(1)
            .plain()
            .line(3)
            .plain()
            .probe(0)
            .exit()
            .begin_method("other", MethodFlags::empty())
            .line(5)
            .plain()
            .line(6)
            .plain()
            .probe(1)
            .exit()
            .finish();
        let mut interner = Interner::new();
        let class = ClassFile::parse(&bytes, &mut interner).expect("parse");
        let map = analyze(&class, &mut interner).expect("analyze");
        (map, interner)
    }

    fn bits(values: &[bool]) -> FixedBitSet {
        let mut set = FixedBitSet::with_capacity(values.len());
        for (i, &value) in values.iter().enumerate() {
            if value {
                set.set(i, true);
            }
        }
        set
    }

    #[test]
    fn hit_probes_merge_into_the_file_coverage() {
        let (map, mut interner) = analyzed_class();
        let test = interner.intern("suite/MyTest");
        let mut aggregator = Aggregator::new();

        let applied = aggregator.apply(test, ClassId(1), &bits(&[true, false]), Some(&map), &interner).expect("apply");
        assert!(applied);
        let applied = aggregator.apply(test, ClassId(1), &bits(&[true, true]), Some(&map), &interner).expect("apply");
        assert!(applied);

        let coverage = aggregator.into_coverage();
        let files = &coverage[&test];
        let (&(path, file), lines) = files.iter().next().expect("one file");
        assert_eq!(&interner[path], "com/example");
        assert_eq!(file.map(|f| &interner[f]), Some("Foo.java"));
        assert_eq!(lines.to_string(), "1-3,5-6");
    }

    #[test]
    fn unanalyzed_classes_are_dropped_without_error() {
        let (_, mut interner) = analyzed_class();
        let test = interner.intern("suite/MyTest");
        let mut aggregator = Aggregator::new();
        let applied = aggregator.apply(test, ClassId(2), &bits(&[true]), None, &interner).expect("apply");
        assert!(!applied);
        assert!(aggregator.into_coverage().is_empty());
    }

    #[test]
    fn short_probe_vectors_are_rejected_without_mutating() {
        let (map, mut interner) = analyzed_class();
        let test = interner.intern("suite/MyTest");
        let mut aggregator = Aggregator::new();

        let error = aggregator.apply(test, ClassId(1), &bits(&[true]), Some(&map), &interner).unwrap_err();
        match *error.kind() {
            ErrorKind::ProbeCountMismatch(ref class, expected, actual) => {
                assert_eq!(class, "com/example/Foo");
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            },
            ref kind => panic!("unexpected error: {}", kind),
        }
        assert!(aggregator.into_coverage().is_empty());
    }

    #[test]
    fn probes_without_lines_contribute_nothing() {
        let bytes = ClassWriter::new("Bare", None, 1)
            .begin_method("m", MethodFlags::empty())
            .plain()
            .probe(0)
            .exit()
            .finish();
        let mut interner = Interner::new();
        let class = ClassFile::parse(&bytes, &mut interner).expect("parse");
        let map = analyze(&class, &mut interner).expect("analyze");
        let test = interner.intern("t");
        let mut aggregator = Aggregator::new();
        let applied = aggregator.apply(test, ClassId(1), &bits(&[true]), Some(&map), &interner).expect("apply");
        assert!(applied);
        // no line information, no entry: an empty file must never reach the report.
        assert!(aggregator.into_coverage().is_empty());
    }
}
