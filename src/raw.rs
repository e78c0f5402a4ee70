//! The raw structures of an exec dump stream.
//!
//! An exec dump is a sequence of self-describing blocks, each starting with a 1-byte [`BlockTag`]. The multi-byte
//! fields are big-endian. The stream opens with a `HEADER` block (magic + format version), followed by any number of
//! `SESSIONINFO` and `EXECUTIONDATA` blocks. Multiple dump files are independent streams, each with its own header.
//!
//! [`BlockTag`]: ./struct.BlockTag.html

use error::*;
use intern::{EMPTY_SYMBOL, Symbol};

use fixedbitset::FixedBitSet;

use std::fmt;

//----------------------------------------------------------------------------------------------------------------------
//{{{ BlockTag

/// The type tag of a block.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlockTag(pub u8);

/// The tag of the `HEADER` block. Must appear once, first in every stream.
pub const HEADER_TAG: BlockTag = BlockTag(0x01);
/// The tag of a `SESSIONINFO` block.
pub const SESSION_INFO_TAG: BlockTag = BlockTag(0x10);
/// The tag of an `EXECUTIONDATA` block.
pub const EXECUTION_DATA_TAG: BlockTag = BlockTag(0x11);

impl fmt::Display for BlockTag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "0x{:02x}", self.0)
    }
}

impl fmt::Debug for BlockTag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "BlockTag(0x{:02x})", self.0)
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Magic & Version

/// The magic number opening the `HEADER` block.
pub const DUMP_MAGIC: u16 = 0xc0c0;

/// Format version of an exec dump stream.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(pub u8);

/// The only dump format version supported by this crate.
pub const VERSION_1: Version = Version(0x01);

impl Version {
    /// Converts a raw version number to a `Version` structure.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedVersion`] if the version is not supported by this crate.
    ///
    /// [`UnsupportedVersion`]: ../error/enum.ErrorKind.html#variant.UnsupportedVersion
    pub fn try_from(raw_version: u8) -> Result<Version> {
        ensure!(Version(raw_version) == VERSION_1, ErrorKind::UnsupportedVersion(raw_version));
        Ok(Version(raw_version))
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Version({})", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ ClassId

/// The 64-bit content hash identifying one class by its raw bytes.
///
/// Classes with identical bytes collapse to one id regardless of which file or archive they were discovered in, so
/// the analysis cache and the dump producer agree on identity without sharing any state. The hash is CRC-64/ECMA-182
/// (polynomial `0x42F0E1EBA9EA3693`, MSB first, zero initial value).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClassId(pub u64);

impl ClassId {
    /// Computes the content hash of a class's raw bytes.
    pub fn of(bytes: &[u8]) -> ClassId {
        const POLY: u64 = 0x42f0_e1eb_a9ea_3693;
        let mut crc = 0u64;
        for &byte in bytes {
            crc ^= u64::from(byte) << 56;
            for _ in 0..8 {
                crc = if crc & (1 << 63) != 0 {
                    (crc << 1) ^ POLY
                } else {
                    crc << 1
                };
            }
        }
        ClassId(crc)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{:016x}", self.0)
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "ClassId({:016x})", self.0)
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Session, ExecutionData & Event

/// A named span attributing the execution records that follow it to one logical unit.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Session {
    /// The session identifier, normally the uniform path of a test. The empty string is reserved for coverage
    /// recorded between tests.
    pub id: Symbol,
    /// Start timestamp, in milliseconds since the epoch.
    pub start: i64,
    /// End timestamp, in milliseconds since the epoch.
    pub end: i64,
}

impl Session {
    /// Whether the session belongs to a test. Non-test sessions carry the reserved empty identifier and their
    /// records never reach the aggregator.
    pub fn is_test(&self) -> bool {
        self.id != EMPTY_SYMBOL
    }
}

/// The probe hits of one class, recorded within one session.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ExecutionData {
    /// Content hash of the executed class.
    pub class_id: ClassId,
    /// Fully-qualified name of the executed class, e.g. `com/example/Foo`.
    pub name: Symbol,
    /// The probe-hit bit vector. Bit *i* is set when probe *i* was executed at least once.
    pub probes: FixedBitSet,
}

/// One event decoded from an exec dump stream.
#[derive(Clone, PartialEq, Debug)]
pub enum Event {
    /// A `SESSIONINFO` block: all execution records until the next session belong to this session.
    SessionStart(Session),
    /// An `EXECUTIONDATA` block.
    ClassExecution(ExecutionData),
}

//}}}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_share_one_id() {
        let a = ClassId::of(b"\xca\xfe\xba\xbe fixture class");
        let b = ClassId::of(b"\xca\xfe\xba\xbe fixture class");
        let c = ClassId::of(b"\xca\xfe\xba\xbe other class");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn crc64_known_vector() {
        // CRC-64/ECMA-182 check value for "123456789".
        assert_eq!(ClassId::of(b"123456789"), ClassId(0x6c40_df5f_0b49_7347));
    }

    #[test]
    fn empty_session_is_not_a_test() {
        let session = Session {
            id: EMPTY_SYMBOL,
            start: 0,
            end: 0,
        };
        assert!(!session.is_test());
    }
}
