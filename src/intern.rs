//! String interning.
//!
//! Class names, source file names, package paths and test identifiers repeat across thousands of execution records.
//! Every stage of the pipeline therefore stores [`Symbol`]s, small indices into one [`Interner`] owned by the
//! report-generation invocation. Strings are resolved back only when the final report is assembled.
//!
//! [`Symbol`]: ./struct.Symbol.html
//! [`Interner`]: ./struct.Interner.html

use num_traits::{Bounded, FromPrimitive, ToPrimitive};
use shawshank::{self, ArenaSet};

use std::fmt;
use std::ops::Index;

/// An interned string.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Symbol(usize);

impl fmt::Debug for Symbol {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Symbol({})", self.0)
    }
}

// shawshank addresses the arena through these three traits.

impl Bounded for Symbol {
    fn min_value() -> Self {
        Symbol(usize::min_value())
    }
    fn max_value() -> Self {
        Symbol(usize::max_value())
    }
}

impl FromPrimitive for Symbol {
    fn from_i64(n: i64) -> Option<Self> {
        usize::from_i64(n).map(Symbol)
    }
    fn from_u64(n: u64) -> Option<Self> {
        usize::from_u64(n).map(Symbol)
    }
    fn from_usize(n: usize) -> Option<Self> {
        Some(Symbol(n))
    }
}

impl ToPrimitive for Symbol {
    fn to_i64(&self) -> Option<i64> {
        self.0.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.0.to_u64()
    }
    fn to_usize(&self) -> Option<usize> {
        Some(self.0)
    }
}

/// The symbol representing the empty string.
///
/// This doubles as the reserved session identifier for non-test ("between tests") coverage, and as the package path
/// of classes in the default package.
pub const EMPTY_SYMBOL: Symbol = Symbol(0);

/// The string interner.
pub struct Interner(ArenaSet<Box<str>, Symbol>);

impl Interner {
    /// Creates a new interner. The empty string is always interned first, as [`EMPTY_SYMBOL`].
    ///
    /// [`EMPTY_SYMBOL`]: ./constant.EMPTY_SYMBOL.html
    pub fn new() -> Interner {
        let mut si = shawshank::Builder::<Box<str>, Symbol>::new().hash().unwrap();
        let symbol = si.intern("").unwrap();
        debug_assert_eq!(symbol, EMPTY_SYMBOL);
        Interner(si)
    }

    /// Interns a string, returning its symbol. Interning the same string twice returns the same symbol.
    pub fn intern<S: Into<Box<str>>>(&mut self, s: S) -> Symbol {
        self.0.intern(s.into()).unwrap()
    }
}

impl Default for Interner {
    fn default() -> Interner {
        Interner::new()
    }
}

impl Index<Symbol> for Interner {
    type Output = str;
    fn index(&self, index: Symbol) -> &str {
        self.0.resolve(index).expect("valid symbol")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut interner = Interner::new();
        let a = interner.intern("com/example/Foo");
        let b = interner.intern("com/example/Bar");
        let c = interner.intern("com/example/Foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(&interner[a], "com/example/Foo");
        assert_eq!(&interner[b], "com/example/Bar");
    }

    #[test]
    fn empty_symbol_is_reserved() {
        let mut interner = Interner::new();
        assert_eq!(interner.intern(""), EMPTY_SYMBOL);
        assert_eq!(&interner[EMPTY_SYMBOL], "");
    }
}
