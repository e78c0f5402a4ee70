//! The class pool and the probe cache.
//!
//! Execution records identify classes by content hash ([`ClassId`]), so the expensive control-flow analysis runs at
//! most once per distinct class *bytes*: the [`ClassPool`] collapses identical byte sequences when class files are
//! registered, and the [`ProbeCache`] memoizes the analysis outcome per id. Failures are memoized too. A class whose
//! bytes are malformed, whose bytes were never registered, or which loses a duplicate-name decision is cached as
//! `None`, logged with `warn!` once, counted, and never retried.
//!
//! [`ClassId`]: ../raw/struct.ClassId.html
//! [`ClassPool`]: ./struct.ClassPool.html
//! [`ProbeCache`]: ./struct.ProbeCache.html

use analysis::{ClassProbeMap, analyze};
use class::ClassFile;
use error::*;
use intern::{Interner, Symbol};
use raw::ClassId;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::rc::Rc;

//----------------------------------------------------------------------------------------------------------------------
//{{{ DuplicatePolicy

/// What to do when two classes with *different* bytes share one fully-qualified name.
///
/// Identical bytes are never a duplicate: they collapse to one [`ClassId`] before analysis. Differing bytes under one
/// name usually mean mixed builds on the classpath, and whichever analysis wins would silently misattribute lines, so
/// the first analyzed class is kept and later ones are suppressed (or, under `Fail`, the whole run is aborted).
///
/// [`ClassId`]: ../raw/struct.ClassId.html
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DuplicatePolicy {
    /// Abort with [`DuplicateClassName`].
    ///
    /// [`DuplicateClassName`]: ../error/enum.ErrorKind.html#variant.DuplicateClassName
    Fail,
    /// Keep the first analyzed class, suppress later ones, and log a warning.
    Warn,
    /// Keep the first analyzed class and suppress later ones silently.
    Ignore,
}

impl Default for DuplicatePolicy {
    fn default() -> DuplicatePolicy {
        DuplicatePolicy::Warn
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ ClassPool

/// Holds the raw bytes of registered class files, keyed by content hash.
///
/// Registration is idempotent for identical bytes. The bytes of one id are handed out at most once, to the probe
/// cache, which keeps the analysis result in their place.
#[derive(Default, Debug)]
pub struct ClassPool {
    classes: HashMap<ClassId, Vec<u8>>,
}

impl ClassPool {
    pub fn new() -> ClassPool {
        ClassPool::default()
    }

    /// Registers a class file, returning its content hash. Bytes identical to an earlier registration are dropped.
    pub fn add(&mut self, bytes: Vec<u8>) -> ClassId {
        let id = ClassId::of(&bytes);
        self.classes.entry(id).or_insert(bytes);
        id
    }

    /// Removes and returns the bytes registered under `id`, or `None` if the id is unknown or already taken.
    pub fn take(&mut self, id: ClassId) -> Option<Vec<u8>> {
        self.classes.remove(&id)
    }

    /// Number of registered classes not yet taken.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ ProbeCache

/// Memoizes the analysis outcome per [`ClassId`].
///
/// [`ClassId`]: ../raw/struct.ClassId.html
#[derive(Default, Debug)]
pub struct ProbeCache {
    policy: DuplicatePolicy,
    entries: HashMap<ClassId, Option<Rc<ClassProbeMap>>>,
    by_name: HashMap<Symbol, ClassId>,
    analyzed: usize,
    failed: usize,
    missing: usize,
    duplicates: usize,
}

impl ProbeCache {
    pub fn new(policy: DuplicatePolicy) -> ProbeCache {
        ProbeCache {
            policy,
            ..ProbeCache::default()
        }
    }

    /// Returns the probe map of the class `id`, analyzing it first if this is the first lookup.
    ///
    /// `provider` supplies the raw class bytes and is only invoked on a cache miss, at most once per id over the
    /// cache's lifetime. A provider returning `None` means the class was never registered; the miss is logged,
    /// counted, and memoized so later lookups stay silent. A malformed class or a probe-numbering inconsistency is
    /// likewise memoized as `None` after a warning.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateClassName`] under [`DuplicatePolicy::Fail`] when the class analyzes fine but its name is
    /// already claimed by a class with different bytes. All other per-class failures are isolated here and reported
    /// through the return value and the counters.
    ///
    /// [`DuplicateClassName`]: ../error/enum.ErrorKind.html#variant.DuplicateClassName
    /// [`DuplicatePolicy::Fail`]: ./enum.DuplicatePolicy.html#variant.Fail
    pub fn lookup_or_analyze<F>(&mut self, id: ClassId, interner: &mut Interner, provider: F) -> Result<Option<Rc<ClassProbeMap>>>
    where
        F: FnOnce() -> Option<Vec<u8>>,
    {
        if let Some(cached) = self.entries.get(&id) {
            return Ok(cached.clone());
        }

        let bytes = match provider() {
            Some(bytes) => bytes,
            None => {
                warn!("no class file registered for id {}, its execution records will be dropped", id);
                self.missing += 1;
                self.entries.insert(id, None);
                return Ok(None);
            },
        };

        let entry = match ClassFile::parse(&bytes, interner).and_then(|class| analyze(&class, interner)) {
            Ok(map) => self.admit(id, map, interner)?,
            Err(e) => {
                warn!("cannot analyze class {}: {}", id, e);
                self.failed += 1;
                None
            },
        };
        self.entries.insert(id, entry.clone());
        Ok(entry)
    }

    /// Claims the analyzed class's name, applying the duplicate policy if another id got there first.
    fn admit(&mut self, id: ClassId, map: ClassProbeMap, interner: &Interner) -> Result<Option<Rc<ClassProbeMap>>> {
        match self.by_name.entry(map.class_name()) {
            Entry::Vacant(vacant) => {
                vacant.insert(id);
                self.analyzed += 1;
                trace!("analyzed class {} ({})", &interner[map.class_name()], id);
                Ok(Some(Rc::new(map)))
            },
            Entry::Occupied(_) => {
                self.duplicates += 1;
                match self.policy {
                    DuplicatePolicy::Fail => bail!(ErrorKind::DuplicateClassName(interner[map.class_name()].to_owned())),
                    DuplicatePolicy::Warn => {
                        warn!("class {} ({}) has the same name as an already analyzed class with different bytes, keeping the first", &interner[map.class_name()], id);
                    },
                    DuplicatePolicy::Ignore => {},
                }
                Ok(None)
            },
        }
    }

    /// Number of classes successfully analyzed.
    pub fn analyzed_classes(&self) -> usize {
        self.analyzed
    }

    /// Number of classes whose analysis failed.
    pub fn failed_classes(&self) -> usize {
        self.failed
    }

    /// Number of looked-up ids with no registered class file.
    pub fn missing_classes(&self) -> usize {
        self.missing
    }

    /// Number of classes suppressed by the duplicate-name policy.
    pub fn duplicate_classes(&self) -> usize {
        self.duplicates
    }
}

//}}}

#[cfg(test)]
mod tests {
    use super::*;
    use class::MethodFlags;
    use class::testutil::ClassWriter;

    use std::cell::Cell;

    fn simple_class(name: &str, line: u32) -> Vec<u8> {
        ClassWriter::new(name, Some("Simple.java"), 1)
            .begin_method("run", MethodFlags::empty())
            .line(line)
            .plain()
            .probe(0)
            .exit()
            .finish()
    }

    #[test]
    fn pool_collapses_identical_bytes() {
        let mut pool = ClassPool::new();
        let a = pool.add(simple_class("A", 1));
        let b = pool.add(simple_class("A", 1));
        let c = pool.add(simple_class("A", 2));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);

        assert!(pool.take(a).is_some());
        assert!(pool.take(a).is_none());
    }

    #[test]
    fn analysis_runs_at_most_once_per_id() {
        let mut interner = Interner::new();
        let mut cache = ProbeCache::new(DuplicatePolicy::Warn);
        let bytes = simple_class("Once", 7);
        let id = ClassId::of(&bytes);
        let calls = Cell::new(0);

        for _ in 0..3 {
            let map = cache
                .lookup_or_analyze(id, &mut interner, || {
                    calls.set(calls.get() + 1);
                    Some(bytes.clone())
                })
                .expect("lookup")
                .expect("map");
            assert_eq!(map.line_range(0), Some(::analysis::LineRange::new(7)));
        }
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.analyzed_classes(), 1);
    }

    #[test]
    fn missing_bytes_are_negative_cached() {
        let mut interner = Interner::new();
        let mut cache = ProbeCache::new(DuplicatePolicy::Warn);
        let id = ClassId(0xdead_beef);
        let calls = Cell::new(0);

        for _ in 0..2 {
            let map = cache
                .lookup_or_analyze(id, &mut interner, || {
                    calls.set(calls.get() + 1);
                    None
                })
                .expect("lookup");
            assert!(map.is_none());
        }
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.missing_classes(), 1);
    }

    #[test]
    fn malformed_bytes_are_negative_cached() {
        let mut interner = Interner::new();
        let mut cache = ProbeCache::new(DuplicatePolicy::Warn);
        let bytes = vec![0xde, 0xad, 0x01];
        let id = ClassId::of(&bytes);

        let map = cache.lookup_or_analyze(id, &mut interner, || Some(bytes.clone())).expect("lookup");
        assert!(map.is_none());
        let map = cache.lookup_or_analyze(id, &mut interner, || panic!("provider must not rerun")).expect("lookup");
        assert!(map.is_none());
        assert_eq!(cache.failed_classes(), 1);
    }

    #[test]
    fn duplicate_names_keep_the_first_under_warn() {
        let mut interner = Interner::new();
        let mut cache = ProbeCache::new(DuplicatePolicy::Warn);
        let first = simple_class("Dup", 1);
        let second = simple_class("Dup", 2);
        let first_id = ClassId::of(&first);
        let second_id = ClassId::of(&second);

        let map = cache.lookup_or_analyze(first_id, &mut interner, || Some(first)).expect("lookup").expect("map");
        assert_eq!(map.line_range(0), Some(::analysis::LineRange::new(1)));

        let suppressed = cache.lookup_or_analyze(second_id, &mut interner, || Some(second)).expect("lookup");
        assert!(suppressed.is_none());
        assert_eq!(cache.analyzed_classes(), 1);
        assert_eq!(cache.duplicate_classes(), 1);
    }

    #[test]
    fn duplicate_names_are_suppressed_silently_under_ignore() {
        let mut interner = Interner::new();
        let mut cache = ProbeCache::new(DuplicatePolicy::Ignore);
        let first = simple_class("Dup", 1);
        let second = simple_class("Dup", 2);
        let first_id = ClassId::of(&first);
        let second_id = ClassId::of(&second);

        let map = cache.lookup_or_analyze(first_id, &mut interner, || Some(first)).expect("lookup").expect("map");
        assert_eq!(map.line_range(0), Some(::analysis::LineRange::new(1)));

        let suppressed = cache.lookup_or_analyze(second_id, &mut interner, || Some(second)).expect("lookup");
        assert!(suppressed.is_none());
        assert_eq!(cache.analyzed_classes(), 1);
        assert_eq!(cache.duplicate_classes(), 1);

        // the suppression is memoized; the newcomer stays negative on later lookups.
        let again = cache.lookup_or_analyze(second_id, &mut interner, || panic!("provider must not rerun")).expect("lookup");
        assert!(again.is_none());
    }

    #[test]
    fn duplicate_names_abort_under_fail() {
        let mut interner = Interner::new();
        let mut cache = ProbeCache::new(DuplicatePolicy::Fail);
        let first = simple_class("Dup", 1);
        let second = simple_class("Dup", 2);
        let first_id = ClassId::of(&first);
        let second_id = ClassId::of(&second);

        cache.lookup_or_analyze(first_id, &mut interner, || Some(first)).expect("lookup");
        assert!(cache.lookup_or_analyze(second_id, &mut interner, || Some(second)).is_err());
    }
}
