//! Errors related to the `probecov` crate.
//!
//! The whole taxonomy lives in one [`error_chain!`] block. Stream-level problems ([`BadMagic`], [`UnknownBlockType`],
//! truncation) are fatal to the stream that produced them only; class-level problems ([`UnknownOpcode`],
//! [`DanglingProbe`], ...) abort the analysis of one class and are swallowed by the cache; record-level problems
//! ([`ProbeCountMismatch`], [`ExecutionOutsideSession`]) are isolated by the processor. Please see documentation of the
//! [`error-chain` crate](https://docs.rs/error-chain/0.12.0/error_chain/) for detailed usage.
//!
//! [`error_chain!`]: https://docs.rs/error-chain/0.12.0/error_chain/macro.error_chain.html
//! [`BadMagic`]: ./enum.ErrorKind.html#variant.BadMagic
//! [`UnknownBlockType`]: ./enum.ErrorKind.html#variant.UnknownBlockType
//! [`UnknownOpcode`]: ./enum.ErrorKind.html#variant.UnknownOpcode
//! [`DanglingProbe`]: ./enum.ErrorKind.html#variant.DanglingProbe
//! [`ProbeCountMismatch`]: ./enum.ErrorKind.html#variant.ProbeCountMismatch
//! [`ExecutionOutsideSession`]: ./enum.ErrorKind.html#variant.ExecutionOutsideSession

use std::fmt;
use std::io;
use std::result::Result as StdResult;
use std::string::FromUtf8Error;

error_chain! {
    foreign_links {
        Io(io::Error) /** Wrapper of standard I/O error. */;
        FromUtf8(FromUtf8Error) /** Wrapper of UTF-8 decode error. */;
    }

    errors {
        /// Additional location information to an error (file cursor, block index, class name).
        At(location: Location) {
            description("error location")
            display("{}", location)
        }

        /// The exec dump stream does not start with the expected magic number.
        BadMagic(magic: u16) {
            description("bad dump magic")
            display("bad dump magic, 0x{:04x} not recognized", magic)
        }

        /// The exec dump stream uses a format version not supported by this crate.
        UnsupportedVersion(version: u8) {
            description("unsupported dump format version")
            display("unsupported dump format version 0x{:02x}", version)
        }

        /// A second `HEADER` block appeared in the middle of an exec dump stream.
        DuplicateHeader {
            description("duplicate header block")
        }

        /// Encountered a block type tag that is not recognized. Fatal to the current stream only.
        UnknownBlockType(tag: u8) {
            description("unknown block type")
            display("unknown block type, tag 0x{:02x} not recognized", tag)
        }

        /// The class bytes do not start with the instrumented-class magic number.
        BadClassMagic(magic: u16) {
            description("bad class magic")
            display("bad class magic, 0x{:04x} not recognized", magic)
        }

        /// The class bytes use a format version not supported by this crate.
        UnsupportedClassVersion(version: u8) {
            description("unsupported class format version")
            display("unsupported class format version 0x{:02x}", version)
        }

        /// Encountered an instruction opcode that is not recognized.
        UnknownOpcode(opcode: u8) {
            description("unknown opcode")
            display("unknown opcode 0x{:02x}", opcode)
        }

        /// A probe marker appeared before any instruction of its method.
        DanglingProbe(probe: u32) {
            description("dangling probe")
            display("probe {} is not attached to any instruction", probe)
        }

        /// A jump or switch targets a label that is never declared in its method.
        UnboundLabel(label: u16) {
            description("unbound label")
            display("jump target label {} is never declared", label)
        }

        /// A probe id is not below the probe count declared by the class.
        ProbeOutOfRange(probe: u32, count: usize) {
            description("probe id out of range")
            display("probe id {} exceeds the declared probe count {}", probe, count)
        }

        /// The same probe id is attached to two instructions of one class.
        DuplicateProbe(probe: u32) {
            description("duplicate probe id")
            display("probe id {} is attached twice", probe)
        }

        /// Two classes with different bytes share one fully-qualified name, under the `Fail` policy.
        DuplicateClassName(name: String) {
            description("duplicate class name")
            display("two different class files share the name {:?}", name)
        }

        /// A probe-hit bit vector is shorter than the probe count of the cached analysis. Signals stale or
        /// mismatched class files; fatal to the one test/class pairing that produced it.
        ProbeCountMismatch(class: String, expected: usize, actual: usize) {
            description("probe count mismatch")
            display("class {} declares {} probes but the execution record carries only {} bits", class, expected, actual)
        }

        /// An execution record appeared before any `SESSIONINFO` block.
        ExecutionOutsideSession {
            description("execution record outside a session")
        }

        /// The whole run produced zero analyzed classes, so there is nothing to report.
        EmptyReport {
            description("no classes were analyzed, the report would be empty")
        }
    }
}

impl Error {
    /// Checks whether the error is caused by a truncated input, i.e. the stream ended in the middle of a block.
    pub fn is_truncated(&self) -> bool {
        match *self.kind() {
            ErrorKind::Io(ref e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

//----------------------------------------------------------------------------------------------------------------------
//{{{ Location

/// Context attached to an error while decoding or analyzing.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Location {
    /// No context.
    None,
    /// Byte offset into the current input.
    Cursor(u64),
    /// Index of a block in the current stream.
    Block(usize),
    /// Name of the class being analyzed.
    Class(String),
}

impl fmt::Display for Location {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Location::None => fmt.write_str("unknown location"),
            Location::Cursor(cursor) => write!(fmt, "at position {0} (0x{0:x})", cursor),
            Location::Block(index) => write!(fmt, "at block index {}", index),
            Location::Class(ref name) => write!(fmt, "in class {}", name),
        }
    }
}

impl Location {
    /// Runs `f`, and if it returns an error, attaches this location as context.
    pub fn wrap<T, E: Into<Error>, F: FnOnce() -> StdResult<T, E>>(self, f: F) -> Result<T> {
        f().map_err(|e| self.wrap_error(e))
    }

    /// Attaches this location as context of `error`.
    ///
    /// I/O errors keep their kind (so a truncation stays recognizable as such) and carry the location in their
    /// message; all other errors are chained under [`At`].
    ///
    /// [`At`]: ./enum.ErrorKind.html#variant.At
    pub fn wrap_error<E: Into<Error>>(self, error: E) -> Error {
        match self {
            Location::None => error.into(),
            location => match error.into() {
                Error(ErrorKind::Io(e), _) => io::Error::new(e.kind(), format!("{} ({})", e, location)).into(),
                error => error.chain_err(|| ErrorKind::At(location)),
            },
        }
    }
}

//}}}
