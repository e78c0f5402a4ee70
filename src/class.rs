//! The raw structures of an instrumented class file.
//!
//! A class file is the compiled form of one class, with probe markers already inserted by the external
//! instrumentation step. Instead of a callback-driven walk over an opaque bytecode blob, the class is decoded up
//! front into a flat list of [`Insn`]s per method, which the [`analysis`] module then consumes in a single explicit
//! traversal.
//!
//! [`Insn`]: ./enum.Insn.html
//! [`analysis`]: ../analysis/index.html

use error::*;
use intern::{Interner, Symbol};

use byteorder::{BigEndian, ByteOrder};


/// The magic number opening an instrumented class file.
pub const CLASS_MAGIC: u16 = 0xc1a5;

/// The only class format version supported by this crate.
pub const CLASS_VERSION: u8 = 0x01;

/// A jump target within one method. Labels may be referenced before they are declared.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct LabelId(pub u16);

bitflags! {
    /// Access flags of a method.
    pub struct MethodFlags: u8 {
        /// The method was generated by the compiler and does not appear in source.
        const SYNTHETIC = 0x01;
        /// The method is a bridge method generated for generics/covariance.
        const BRIDGE = 0x02;
    }
}

/// One decoded instruction or marker of a method body.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Insn {
    /// An ordinary instruction without control-flow effect.
    Plain,
    /// A line-number marker: instructions that follow belong to this 1-based source line.
    Line(u32),
    /// A label declaration. Binds the label to the next instruction; does not break fallthrough.
    Label(LabelId),
    /// A jump. A conditional jump falls through to the next instruction as well; an unconditional one breaks the
    /// fallthrough edge.
    Jump {
        /// The label jumped to.
        target: LabelId,
        /// Whether the jump is always taken.
        unconditional: bool,
    },
    /// A switch dispatching to one of several labels (including its default). Always breaks fallthrough.
    Switch(Vec<LabelId>),
    /// A return or throw. Breaks fallthrough.
    Exit,
    /// A probe marker inserted by the instrumentation, attached to the preceding instruction.
    Probe(u32),
}

/// One method of a class.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Method {
    /// Method name.
    pub name: Symbol,
    /// Access flags.
    pub flags: MethodFlags,
    /// The decoded body.
    pub insns: Vec<Insn>,
}

impl Method {
    /// Whether the method is skipped by the analysis.
    ///
    /// Compiler-generated synthetic and bridge methods carry no source coverage of their own. The exception is the
    /// synthetic method holding a lambda body, which contains real user code.
    pub fn is_filtered(&self, interner: &Interner) -> bool {
        self.flags.intersects(MethodFlags::SYNTHETIC | MethodFlags::BRIDGE) && !interner[self.name].starts_with("lambda$")
    }
}

/// One decoded, probe-instrumented class.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ClassFile {
    /// Fully-qualified class name, e.g. `com/example/Foo`.
    pub name: Symbol,
    /// Name of the source file this class was compiled from, when the compiler recorded it.
    pub source_file: Option<Symbol>,
    /// Total number of probes inserted into this class.
    pub probe_count: usize,
    /// The methods of the class, in declaration order.
    pub methods: Vec<Method>,
}

impl ClassFile {
    /// Decodes a class from its raw bytes.
    ///
    /// # Errors
    ///
    /// * Returns [`BadClassMagic`] if the bytes are not an instrumented class file.
    /// * Returns [`UnsupportedClassVersion`] if the class format version is not supported by this crate.
    /// * Returns [`UnknownOpcode`] if a method body contains an unrecognized opcode.
    /// * Returns [`Io`] if the input ends in the middle of a structure.
    /// * Returns [`FromUtf8`] if a name is not UTF-8 encoded.
    ///
    /// [`BadClassMagic`]: ../error/enum.ErrorKind.html#variant.BadClassMagic
    /// [`UnsupportedClassVersion`]: ../error/enum.ErrorKind.html#variant.UnsupportedClassVersion
    /// [`UnknownOpcode`]: ../error/enum.ErrorKind.html#variant.UnknownOpcode
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    /// [`FromUtf8`]: ../error/enum.ErrorKind.html#variant.FromUtf8
    pub fn parse(bytes: &[u8], interner: &mut Interner) -> Result<ClassFile> {
        let mut decoder = Decoder { bytes, cursor: 0 };

        trace!("class-magic @ 0x{:x}", decoder.cursor);
        let magic = decoder.read_u16()?;
        ensure!(magic == CLASS_MAGIC, ErrorKind::BadClassMagic(magic));
        trace!("class-version @ 0x{:x}", decoder.cursor);
        let version = decoder.read_u8()?;
        ensure!(version == CLASS_VERSION, ErrorKind::UnsupportedClassVersion(version));

        trace!("class-name @ 0x{:x}", decoder.cursor);
        let name = decoder.read_string(interner)?;
        trace!("class-source-file @ 0x{:x}", decoder.cursor);
        let source_file = if decoder.read_u8()? != 0 {
            Some(decoder.read_string(interner)?)
        } else {
            None
        };
        trace!("class-probe-count @ 0x{:x}", decoder.cursor);
        let probe_count = decoder.read_varint()? as usize;

        trace!("class-method-count @ 0x{:x}", decoder.cursor);
        let method_count = decoder.read_u16()?;
        let mut methods = Vec::with_capacity(usize::from(method_count));
        for _ in 0..method_count {
            methods.push(decoder.read_method(interner)?);
        }

        debug!("parsed class {:?}: {} probes, {} methods", &interner[name], probe_count, methods.len());
        Ok(ClassFile {
            name,
            source_file,
            probe_count,
            methods,
        })
    }
}

//----------------------------------------------------------------------------------------------------------------------
//{{{ Decoder

// Opcodes of the method body encoding.
const INSN_PLAIN: u8 = 0x00;
const INSN_LINE: u8 = 0x01;
const INSN_LABEL: u8 = 0x02;
const INSN_JUMP: u8 = 0x03;
const INSN_SWITCH: u8 = 0x04;
const INSN_EXIT: u8 = 0x05;
const INSN_PROBE: u8 = 0x06;

/// Cursor-tracking decoder over an in-memory class file.
struct Decoder<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> Decoder<'a> {
    /// Takes the next `count` bytes off the input.
    ///
    /// # Errors
    ///
    /// Returns [`Io`] with kind `UnexpectedEof` if fewer than `count` bytes remain.
    ///
    /// [`Io`]: ../error/enum.ErrorKind.html#variant.Io
    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.bytes.len() - self.cursor < count {
            let e = io_eof();
            bail!(Location::Cursor(self.cursor as u64).wrap_error(e));
        }
        let slice = &self.bytes[self.cursor..self.cursor + count];
        self.cursor += count;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

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
        let e = ::std::io::Error::new(::std::io::ErrorKind::InvalidData, "varint does not fit in 32 bits");
        Err(Location::Cursor(self.cursor as u64).wrap_error(e))
    }

    fn read_string(&mut self, interner: &mut Interner) -> Result<Symbol> {
        let length = usize::from(self.read_u16()?);
        let cursor = self.cursor;
        let buf = self.take(length)?.to_vec();
        let string = Location::Cursor(cursor as u64).wrap(|| String::from_utf8(buf))?;
        Ok(interner.intern(string))
    }

    fn read_method(&mut self, interner: &mut Interner) -> Result<Method> {
        trace!("method-name @ 0x{:x}", self.cursor);
        let name = self.read_string(interner)?;
        trace!("method-flags @ 0x{:x}", self.cursor);
        let raw_flags = self.read_u8()?;
        let flags = MethodFlags::from_bits_truncate(raw_flags);
        trace!("method-insn-count @ 0x{:x}", self.cursor);
        let insn_count = self.read_u16()?;
        let mut insns = Vec::with_capacity(usize::from(insn_count));
        for _ in 0..insn_count {
            insns.push(self.read_insn()?);
        }
        Ok(Method { name, flags, insns })
    }

    fn read_insn(&mut self) -> Result<Insn> {
        let cursor = self.cursor;
        let opcode = self.read_u8()?;
        Ok(match opcode {
            INSN_PLAIN => Insn::Plain,
            INSN_LINE => Insn::Line(self.read_u32()?),
            INSN_LABEL => Insn::Label(LabelId(self.read_u16()?)),
            INSN_JUMP => {
                let target = LabelId(self.read_u16()?);
                let unconditional = self.read_u8()? != 0;
                Insn::Jump {
                    target,
                    unconditional,
                }
            },
            INSN_SWITCH => {
                let count = usize::from(self.read_u16()?);
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(LabelId(self.read_u16()?));
                }
                Insn::Switch(targets)
            },
            INSN_EXIT => Insn::Exit,
            INSN_PROBE => Insn::Probe(self.read_varint()?),
            opcode => bail!(Location::Cursor(cursor as u64).wrap_error(ErrorKind::UnknownOpcode(opcode))),
        })
    }
}

fn io_eof() -> ::std::io::Error {
    ::std::io::Error::new(::std::io::ErrorKind::UnexpectedEof, "class file is cut short")
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ Test encoder

/// Encoder producing class bytes for the decoder/analysis/cache tests. Only compiled into the test harness; the real
/// producer of this format is the external instrumentation step.
#[cfg(test)]
pub mod testutil {
    use super::*;

    pub struct ClassWriter {
        bytes: Vec<u8>,
        method_count_offset: usize,
        method_count: u16,
        insn_count_offset: usize,
        insn_count: u16,
    }

    impl ClassWriter {
        pub fn new(name: &str, source_file: Option<&str>, probe_count: u32) -> ClassWriter {
            let mut bytes = Vec::new();
            push_u16(&mut bytes, CLASS_MAGIC);
            bytes.push(CLASS_VERSION);
            push_string(&mut bytes, name);
            match source_file {
                Some(source_file) => {
                    bytes.push(1);
                    push_string(&mut bytes, source_file);
                },
                None => bytes.push(0),
            }
            push_varint(&mut bytes, probe_count);
            let method_count_offset = bytes.len();
            push_u16(&mut bytes, 0);
            ClassWriter {
                bytes,
                method_count_offset,
                method_count: 0,
                insn_count_offset: 0,
                insn_count: 0,
            }
        }

        pub fn begin_method(&mut self, name: &str, flags: MethodFlags) -> &mut ClassWriter {
            self.method_count += 1;
            push_string(&mut self.bytes, name);
            self.bytes.push(flags.bits());
            self.insn_count_offset = self.bytes.len();
            push_u16(&mut self.bytes, 0);
            self.insn_count = 0;
            self
        }

        pub fn plain(&mut self) -> &mut ClassWriter {
            self.insn(INSN_PLAIN);
            self
        }

        pub fn line(&mut self, line: u32) -> &mut ClassWriter {
            self.insn(INSN_LINE);
            let mut buf = [0u8; 4];
            BigEndian::write_u32(&mut buf, line);
            self.bytes.extend_from_slice(&buf);
            self
        }

        pub fn label(&mut self, label: u16) -> &mut ClassWriter {
            self.insn(INSN_LABEL);
            push_u16(&mut self.bytes, label);
            self
        }

        pub fn jump(&mut self, target: u16, unconditional: bool) -> &mut ClassWriter {
            self.insn(INSN_JUMP);
            push_u16(&mut self.bytes, target);
            self.bytes.push(unconditional as u8);
            self
        }

        pub fn switch(&mut self, targets: &[u16]) -> &mut ClassWriter {
            self.insn(INSN_SWITCH);
            push_u16(&mut self.bytes, targets.len() as u16);
            for &target in targets {
                push_u16(&mut self.bytes, target);
            }
            self
        }

        pub fn exit(&mut self) -> &mut ClassWriter {
            self.insn(INSN_EXIT);
            self
        }

        pub fn probe(&mut self, probe: u32) -> &mut ClassWriter {
            self.insn(INSN_PROBE);
            push_varint(&mut self.bytes, probe);
            self
        }

        fn insn(&mut self, opcode: u8) {
            self.insn_count += 1;
            let offset = self.insn_count_offset;
            let count = self.insn_count;
            BigEndian::write_u16(&mut self.bytes[offset..offset + 2], count);
            self.bytes.push(opcode);
        }

        pub fn finish(&mut self) -> Vec<u8> {
            let offset = self.method_count_offset;
            let count = self.method_count;
            BigEndian::write_u16(&mut self.bytes[offset..offset + 2], count);
            self.bytes.clone()
        }
    }

    pub fn push_u16(bytes: &mut Vec<u8>, value: u16) {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, value);
        bytes.extend_from_slice(&buf);
    }

    pub fn push_string(bytes: &mut Vec<u8>, s: &str) {
        push_u16(bytes, s.len() as u16);
        bytes.extend_from_slice(s.as_bytes());
    }

    pub fn push_varint(bytes: &mut Vec<u8>, mut value: u32) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                bytes.push(byte);
                return;
            }
            bytes.push(byte | 0x80);
        }
    }
}

//}}}

#[cfg(test)]
mod tests {
    use super::*;
    use super::testutil::ClassWriter;

    #[test]
    fn parses_a_simple_class() {
        let bytes = ClassWriter::new("com/example/Foo", Some("Foo.java"), 2)
            .begin_method("run", MethodFlags::empty())
            .line(10)
            .plain()
            .probe(0)
            .line(11)
            .plain()
            .probe(1)
            .exit()
            .finish();

        let mut interner = Interner::new();
        let class = ClassFile::parse(&bytes, &mut interner).expect("parse");
        assert_eq!(&interner[class.name], "com/example/Foo");
        assert_eq!(class.source_file.map(|s| &interner[s]), Some("Foo.java"));
        assert_eq!(class.probe_count, 2);
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class.methods[0].insns.len(), 7);
        assert_eq!(class.methods[0].insns[0], Insn::Line(10));
        assert_eq!(class.methods[0].insns[2], Insn::Probe(0));
        assert_eq!(class.methods[0].insns[6], Insn::Exit);
    }

    #[test]
    fn missing_source_file_parses_to_none() {
        let bytes = ClassWriter::new("Naked", None, 0).finish();
        let mut interner = Interner::new();
        let class = ClassFile::parse(&bytes, &mut interner).expect("parse");
        assert_eq!(class.source_file, None);
        assert!(class.methods.is_empty());
    }

    #[test]
    fn rejects_bad_magic_and_unknown_opcodes() {
        let mut interner = Interner::new();
        assert!(ClassFile::parse(&[0xde, 0xad, 0x01], &mut interner).is_err());

        let mut bytes = ClassWriter::new("Bad", None, 0)
            .begin_method("m", MethodFlags::empty())
            .plain()
            .finish();
        let last = bytes.len() - 1;
        bytes[last] = 0x7f; // overwrite the PLAIN opcode
        assert!(ClassFile::parse(&bytes, &mut interner).is_err());
    }

    #[test]
    fn rejects_probe_counts_wider_than_32_bits() {
        let mut bytes = Vec::new();
        testutil::push_u16(&mut bytes, CLASS_MAGIC);
        bytes.push(CLASS_VERSION);
        testutil::push_string(&mut bytes, "Over");
        bytes.push(0); // no source file
        // 2^36 - 1 as the probe count: the fifth varint byte carries bits above the 32nd.
        bytes.extend_from_slice(&[0xff, 0xff, 0xff, 0xff, 0x1f]);
        testutil::push_u16(&mut bytes, 0); // no methods

        let mut interner = Interner::new();
        let err = ClassFile::parse(&bytes, &mut interner).unwrap_err();
        assert!(!err.is_truncated(), "reported as truncation: {}", err);
    }

    #[test]
    fn truncated_class_is_an_error() {
        let bytes = ClassWriter::new("Cut", Some("Cut.java"), 4).finish();
        let mut interner = Interner::new();
        let err = ClassFile::parse(&bytes[..bytes.len() - 3], &mut interner).unwrap_err();
        assert!(err.is_truncated(), "not a truncation: {}", err);
    }

    #[test]
    fn synthetic_filter_spares_lambda_bodies() {
        let mut interner = Interner::new();
        let lambda = Method {
            name: interner.intern("lambda$main$0"),
            flags: MethodFlags::SYNTHETIC,
            insns: Vec::new(),
        };
        let bridge = Method {
            name: interner.intern("compareTo"),
            flags: MethodFlags::BRIDGE | MethodFlags::SYNTHETIC,
            insns: Vec::new(),
        };
        let plain = Method {
            name: interner.intern("main"),
            flags: MethodFlags::empty(),
            insns: Vec::new(),
        };
        assert!(!lambda.is_filtered(&interner));
        assert!(bridge.is_filtered(&interner));
        assert!(!plain.is_filtered(&interner));
    }
}
