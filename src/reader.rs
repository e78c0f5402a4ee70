//! Reader of the exec dump format.
//!
//! The dump is a flat sequence of blocks described in the [`raw`] module. The reader is lazy: one [`Event`] is
//! decoded per call, so a multi-gigabyte run is folded without ever materializing more than the current block.
//!
//! [`raw`]: ../raw/index.html
//! [`Event`]: ../raw/enum.Event.html
//!
//! # Examples
//!
//! ```rust
//! use probecov::reader::Reader;
//! use probecov::Interner;
//! # use probecov::Result;
//!
//! # fn main() { run().unwrap(); }
//! # fn run() -> Result<()> {
//! let dump: &[u8] = &[0x01, 0xc0, 0xc0, 0x01]; // header-only stream
//! let mut interner = Interner::new();
//!
//! // read the header.
//! let mut reader = Reader::new(dump)?;
//! // read the content.
//! while let Some(_event) = reader.read_event(&mut interner)? {
//!     // fold the event...
//! }
//! # Ok(()) }
//! ```

use error::*;
use intern::{Interner, Symbol};
use raw::*;

use byteorder::{BigEndian, ReadBytesExt};
use fixedbitset::FixedBitSet;

use std::io::{self, Read};
use std::result::Result as StdResult;

/// The reader of one exec dump stream.
#[derive(Debug)]
pub struct Reader<R> {
    reader: R,
    cursor: u64,
    version: Version,
    blocks: usize,
}

impl<R: Read> Reader<R> {
    /// Advances the reader cursor by `count` bytes. If `res` is an error, include the stream position information to
    /// the error, otherwise return `res` as-is.
    fn advance_cursor<T, E: Into<Error>>(&mut self, count: u64, res: StdResult<T, E>) -> Result<T> {
        Location::Cursor(self.cursor).wrap(|| {
            self.cursor += count;
            res
        })
    }

    /// Reads a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`Io`] on I/O failure, e.g. reaching end-of-file.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8();
        self.advance_cursor(1, value)
    }

    /// Reads a big-endian 16-bit number.
    fn read_u16(&mut self) -> Result<u16> {
        let value = self.reader.read_u16::<BigEndian>();
        self.advance_cursor(2, value)
    }

    /// Reads a big-endian 64-bit number.
    fn read_u64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<BigEndian>();
        self.advance_cursor(8, value)
    }

    /// Reads a big-endian signed 64-bit number.
    fn read_i64(&mut self) -> Result<i64> {
        let value = self.reader.read_i64::<BigEndian>();
        self.advance_cursor(8, value)
    }

    /// Reads a variable-length unsigned number: 7-bit groups, lowest group first, high bit set on continuation
    /// bytes.
    ///
    /// # Errors
    ///
    /// * Returns [`Io`] on I/O failure.
    /// * Returns [`Io`] with kind `InvalidData` if the encoding does not terminate within 32 bits, or if the last
    ///   group carries bits beyond the 32nd.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn read_varint(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for shift in 0..5 {
            let byte = self.read_u8()?;
            // the fifth group holds the top 4 bits only; anything above would be discarded by the shift.
            if shift == 4 && byte & 0xf0 != 0 {
                break;
            }
            value |= u32::from(byte & 0x7f) << (shift * 7);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        let cursor = self.cursor;
        Err(Location::Cursor(cursor).wrap_error(io::Error::new(io::ErrorKind::InvalidData, "varint does not fit in 32 bits")))
    }

    /// Reads a length-prefixed UTF-8 string and interns it.
    ///
    /// # Errors
    ///
    /// * Returns [`Io`] on I/O failure, e.g. reaching end-of-file.
    /// * Returns [`FromUtf8`] if the string is not encoded in UTF-8.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    /// [`FromUtf8`]: ../error/enum.ErrorKind.html#variant.FromUtf8
    fn read_string(&mut self, interner: &mut Interner) -> Result<Symbol> {
        let length = u64::from(self.read_u16()?);
        let mut buf = Vec::with_capacity(length as usize);
        let cursor = self.cursor;
        let read = self.reader.by_ref().take(length).read_to_end(&mut buf);
        let read = self.advance_cursor(length, read)?;
        if (read as u64) < length {
            let e = io::Error::new(io::ErrorKind::UnexpectedEof, "string is cut short");
            bail!(Location::Cursor(cursor).wrap_error(e));
        }
        let string = Location::Cursor(cursor).wrap(|| String::from_utf8(buf))?;
        Ok(interner.intern(string))
    }

    /// Reads a packed probe-hit bit vector of `count` probes: `ceil(count / 8)` bytes, bit *i* stored in byte
    /// `i / 8` under the mask `1 << (i % 8)`.
    ///
    /// # Errors
    ///
    /// Returns [`Io`] on I/O failure, e.g. reaching end-of-file.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn read_probes(&mut self, count: usize) -> Result<FixedBitSet> {
        let mut probes = FixedBitSet::with_capacity(count);
        let byte_count = (count + 7) / 8;
        for byte_index in 0..byte_count {
            let byte = self.read_u8()?;
            if byte == 0 {
                continue;
            }
            for bit in 0..8 {
                let probe = byte_index * 8 + bit;
                if probe < count && byte & (1 << bit) != 0 {
                    probes.insert(probe);
                }
            }
        }
        Ok(probes)
    }

    /// Parses the `HEADER` block of the stream, and creates a new exec dump reader.
    ///
    /// # Errors
    ///
    /// * Returns [`UnknownBlockType`] if the stream does not start with a `HEADER` block.
    /// * Returns [`BadMagic`] if the magic number is wrong, e.g. when the stream is not an exec dump at all.
    /// * Returns [`UnsupportedVersion`] if the dump format version is not supported by this crate.
    /// * Returns [`Io`] on I/O failure.
    ///
    /// [`UnknownBlockType`]: ../error/enum.ErrorKind.html#variant.UnknownBlockType
    /// [`BadMagic`]: ../error/enum.ErrorKind.html#variant.BadMagic
    /// [`UnsupportedVersion`]: ../error/enum.ErrorKind.html#variant.UnsupportedVersion
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    pub fn new(reader: R) -> Result<Reader<R>> {
        let mut result = Reader {
            reader,
            cursor: 0,
            version: Version::default(),
            blocks: 0,
        };
        trace!("dump-header-tag @ 0x{:x}", result.cursor);
        let tag = BlockTag(result.read_u8()?);
        ensure!(tag == HEADER_TAG, ErrorKind::UnknownBlockType(tag.0));
        trace!("dump-magic @ 0x{:x}", result.cursor);
        let magic = result.read_u16()?;
        ensure!(magic == DUMP_MAGIC, ErrorKind::BadMagic(magic));
        trace!("dump-version @ 0x{:x}", result.cursor);
        let version = result.read_u8()?;
        result.version = Location::Cursor(result.cursor - 1).wrap(|| Version::try_from(version))?;
        result.blocks = 1;
        Ok(result)
    }

    /// The format version declared by the stream header.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Reads the next event from the stream. Returns `Ok(None)` on a clean end-of-stream, i.e. when the input ends
    /// exactly on a block boundary.
    ///
    /// All strings are interned into the supplied `interner`.
    ///
    /// # Errors
    ///
    /// * Returns [`UnknownBlockType`] if the block type tag is not recognized. The stream cannot be resumed; events
    ///   already returned remain usable.
    /// * Returns [`DuplicateHeader`] if a second `HEADER` block appears.
    /// * Returns [`Io`] on I/O failure, including a stream truncated in the middle of a block.
    /// * Returns [`FromUtf8`] if a string in the stream is not UTF-8 encoded.
    ///
    /// [`UnknownBlockType`]: ../error/enum.ErrorKind.html#variant.UnknownBlockType
    /// [`DuplicateHeader`]: ../error/enum.ErrorKind.html#variant.DuplicateHeader
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    /// [`FromUtf8`]: ../error/enum.ErrorKind.html#variant.FromUtf8
    pub fn read_event(&mut self, interner: &mut Interner) -> Result<Option<Event>> {
        trace!("block-tag @ 0x{:x}", self.cursor);
        let tag = match self.read_block_tag()? {
            Some(tag) => tag,
            None => {
                trace!("**** reached end of stream after {} blocks", self.blocks);
                return Ok(None);
            },
        };
        let index = self.blocks;
        self.blocks += 1;
        Location::Block(index).wrap(|| -> Result<_> {
            Ok(Some(match tag {
                SESSION_INFO_TAG => Event::SessionStart(self.parse_session_info(interner)?),
                EXECUTION_DATA_TAG => Event::ClassExecution(self.parse_execution_data(interner)?),
                HEADER_TAG => bail!(ErrorKind::DuplicateHeader),
                tag => bail!(ErrorKind::UnknownBlockType(tag.0)),
            }))
        })
    }

    /// Returns an iterator of the remaining events of the stream.
    pub fn events<'r, 'si>(&'r mut self, interner: &'si mut Interner) -> Events<'r, 'si, R> {
        Events {
            reader: self,
            interner,
            done: false,
        }
    }

    /// Reads the type tag of the next block, distinguishing a clean end-of-stream (`None`) from a truncation inside
    /// a block (which only the field readers can produce).
    fn read_block_tag(&mut self) -> Result<Option<BlockTag>> {
        let mut buf = [0u8; 1];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.cursor += 1;
                    return Ok(Some(BlockTag(buf[0])));
                },
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let cursor = self.cursor;
                    bail!(Location::Cursor(cursor).wrap_error(e));
                },
            }
        }
    }

    /// Parses the body of a `SESSIONINFO` block.
    fn parse_session_info(&mut self, interner: &mut Interner) -> Result<Session> {
        trace!("session-id @ 0x{:x}", self.cursor);
        let id = self.read_string(interner)?;
        trace!("session-start @ 0x{:x}", self.cursor);
        let start = self.read_i64()?;
        trace!("session-end @ 0x{:x}", self.cursor);
        let end = self.read_i64()?;
        Ok(Session { id, start, end })
    }

    /// Parses the body of an `EXECUTIONDATA` block.
    fn parse_execution_data(&mut self, interner: &mut Interner) -> Result<ExecutionData> {
        trace!("execution-class-id @ 0x{:x}", self.cursor);
        let class_id = ClassId(self.read_u64()?);
        trace!("execution-class-name @ 0x{:x}", self.cursor);
        let name = self.read_string(interner)?;
        trace!("execution-probe-count @ 0x{:x}", self.cursor);
        let count = self.read_varint()? as usize;
        trace!("execution-probes @ 0x{:x}; {} probes", self.cursor, count);
        let probes = self.read_probes(count)?;
        Ok(ExecutionData {
            class_id,
            name,
            probes,
        })
    }
}

/// An iterator yielding the events of one stream until a clean end-of-stream or the first error.
///
/// The iterator is fused on error: once a block fails to decode, the stream position is unreliable and iteration
/// stops for this stream. Events yielded before the failure remain usable.
pub struct Events<'r, 'si, R: 'r> {
    reader: &'r mut Reader<R>,
    interner: &'si mut Interner,
    done: bool,
}

impl<'r, 'si, R: Read> Iterator for Events<'r, 'si, R> {
    type Item = Result<Event>;
    fn next(&mut self) -> Option<Result<Event>> {
        if self.done {
            return None;
        }
        match self.reader.read_event(self.interner) {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            },
            Err(e) => {
                self.done = true;
                Some(Err(e))
            },
        }
    }
}
