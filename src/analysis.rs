//! Control-flow reconstruction over an instrumented class, producing the probe → source-line mapping.
//!
//! The analysis makes one linear pass over each method body. Every real instruction becomes a node in a per-method
//! arena, tagged with the current source line and linked by index to its fallthrough predecessor. Jump and switch
//! targets are collected as pending edges and resolved once the whole method has been scanned, since labels may be
//! forward references. A probe's covered lines are then derived by walking the predecessor chain backwards from the
//! node the probe is attached to, widening one [`LineRange`] with every line encountered, until an entry or merge
//! point (a node without predecessor) is reached.
//!
//! The derived mapping is a single covering range per probe, not the exact set of lines touched: for irregular
//! control flow (e.g. inlined helpers compiled to non-contiguous lines) lines strictly between the minimum and the
//! maximum may be overcounted.
//!
//! [`LineRange`]: ./struct.LineRange.html

use class::{ClassFile, Insn, Method};
use error::*;
use intern::{EMPTY_SYMBOL, Interner, Symbol};

use fixedbitset::FixedBitSet;

use std::collections::HashMap;
use std::fmt;

//----------------------------------------------------------------------------------------------------------------------
//{{{ LineRange

/// An inclusive, 1-based range of contiguous source lines.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct LineRange {
    start: u32,
    end: u32,
}

impl LineRange {
    /// Creates a range covering the single line `line`.
    pub fn new(line: u32) -> LineRange {
        LineRange { start: line, end: line }
    }

    /// Creates a range covering `start` to `end` inclusive. `start` must not exceed `end`.
    pub fn between(start: u32, end: u32) -> LineRange {
        debug_assert!(start <= end);
        LineRange { start, end }
    }

    /// The first covered line.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// The last covered line.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Grows the range so that it contains `line`.
    pub fn adjust_to_contain(&mut self, line: u32) {
        if line < self.start {
            self.start = line;
        }
        if line > self.end {
            self.end = line;
        }
    }

    /// Whether `other` overlaps this range or starts directly after it, i.e. the two can be merged into one range
    /// without covering any extra line.
    pub fn touches(&self, other: &LineRange) -> bool {
        other.start <= self.end.saturating_add(1) && self.start <= other.end.saturating_add(1)
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if self.start == self.end {
            write!(fmt, "{}", self.start)
        } else {
            write!(fmt, "{}-{}", self.start, self.end)
        }
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ ClassProbeMap

/// The per-class result of the analysis: which source lines each probe stands for.
///
/// Constructed exactly once per distinct [`ClassId`] and never mutated afterwards; the probe cache hands out shared
/// references for the rest of the report-generation invocation.
///
/// [`ClassId`]: ../raw/struct.ClassId.html
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ClassProbeMap {
    name: Symbol,
    path: Symbol,
    source_file: Option<Symbol>,
    probes: Vec<Option<LineRange>>,
}

impl ClassProbeMap {
    /// Fully-qualified name of the analyzed class.
    pub fn class_name(&self) -> Symbol {
        self.name
    }

    /// Package path of the class, e.g. `com/example` for `com/example/Foo`. [`EMPTY_SYMBOL`] for the default
    /// package.
    ///
    /// [`EMPTY_SYMBOL`]: ../intern/constant.EMPTY_SYMBOL.html
    pub fn path(&self) -> Symbol {
        self.path
    }

    /// Name of the source file, when the compiler recorded it. Without it the class is still usable, but its
    /// coverage is reported with an absent file name.
    pub fn source_file(&self) -> Option<Symbol> {
        self.source_file
    }

    /// Number of probes declared by the class. Every probe-hit bit vector presented for this class must carry at
    /// least this many bits.
    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// The lines covered by executing probe `probe`, or `None` when the probe sits in code without line
    /// information.
    pub fn line_range(&self, probe: usize) -> Option<LineRange> {
        self.probes.get(probe).cloned().unwrap_or(None)
    }
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ analyze

/// Analyzes a decoded class, mapping every probe id to the source lines its enclosing code region touches.
///
/// Synthetic and bridge methods are skipped entirely (no nodes, no probes), except synthetic methods holding lambda
/// bodies, which are analyzed normally.
///
/// # Errors
///
/// * Returns [`DanglingProbe`] if a probe marker appears before any instruction of its method.
/// * Returns [`UnboundLabel`] if a jump targets a label that its method never declares.
/// * Returns [`ProbeOutOfRange`] if a probe id is not below the declared probe count.
/// * Returns [`DuplicateProbe`] if one probe id is attached twice.
///
/// [`DanglingProbe`]: ../error/enum.ErrorKind.html#variant.DanglingProbe
/// [`UnboundLabel`]: ../error/enum.ErrorKind.html#variant.UnboundLabel
/// [`ProbeOutOfRange`]: ../error/enum.ErrorKind.html#variant.ProbeOutOfRange
/// [`DuplicateProbe`]: ../error/enum.ErrorKind.html#variant.DuplicateProbe
pub fn analyze(class: &ClassFile, interner: &mut Interner) -> Result<ClassProbeMap> {
    let name = interner[class.name].to_owned();
    let path = package_path(class.name, interner);
    Location::Class(name.clone()).wrap(|| -> Result<ClassProbeMap> {
        let mut probes = vec![None; class.probe_count];

        for method in &class.methods {
            if method.is_filtered(interner) {
                trace!("skipping synthetic method {:?}", &interner[method.name]);
                continue;
            }
            MethodFlow::scan(method)?.record_probes(&mut probes)?;
        }

        debug!("analyzed class {}: {}/{} probes carry line information", name, probes.iter().filter(|p| p.is_some()).count(), probes.len());
        Ok(ClassProbeMap {
            name: class.name,
            path,
            source_file: class.source_file,
            probes,
        })
    })
}

/// Interns the package path of a class name, i.e. everything before the last `/`.
fn package_path(name: Symbol, interner: &mut Interner) -> Symbol {
    let prefix = match interner[name].rfind('/') {
        Some(index) => interner[name][..index].to_owned(),
        None => return EMPTY_SYMBOL,
    };
    interner.intern(prefix)
}

//}}}
//----------------------------------------------------------------------------------------------------------------------
//{{{ MethodFlow

/// One instruction node of the per-method arena.
#[derive(Copy, Clone, Debug)]
struct Node {
    /// Source line the instruction belongs to, if any line marker preceded it.
    line: Option<u32>,
    /// Arena index of the predecessor, or `None` at an entry or merge point.
    pred: Option<usize>,
}

/// The reconstructed control flow of one method: an instruction arena addressed by index, with single predecessor
/// links, plus the probes attached to its nodes.
struct MethodFlow {
    nodes: Vec<Node>,
    attached: Vec<(u32, usize)>,
}

impl MethodFlow {
    /// Scans a method body in one linear pass.
    fn scan(method: &Method) -> Result<MethodFlow> {
        let mut nodes: Vec<Node> = Vec::new();
        let mut attached = Vec::new();
        // label -> arena index of the first node after its declaration.
        let mut bound_labels = HashMap::new();
        // labels declared but not yet bound to a node.
        let mut open_labels = Vec::new();
        // (source node, target label) edges to resolve after the scan.
        let mut pending_edges = Vec::new();
        let mut current_line = None;
        // fallthrough predecessor of the next node; None when the previous instruction broke the control edge.
        let mut fallthrough = None;

        for insn in &method.insns {
            match *insn {
                Insn::Line(line) => current_line = Some(line),
                Insn::Label(label) => open_labels.push(label),
                Insn::Probe(probe) => {
                    match nodes.len().checked_sub(1) {
                        Some(node) => attached.push((probe, node)),
                        None => bail!(ErrorKind::DanglingProbe(probe)),
                    }
                },
                Insn::Plain | Insn::Jump { .. } | Insn::Switch(_) | Insn::Exit => {
                    let index = nodes.len();
                    nodes.push(Node {
                        line: current_line,
                        pred: fallthrough,
                    });
                    for label in open_labels.drain(..) {
                        bound_labels.entry(label).or_insert(index);
                    }
                    fallthrough = match *insn {
                        Insn::Jump { target, unconditional } => {
                            pending_edges.push((index, target));
                            if unconditional {
                                None
                            } else {
                                Some(index)
                            }
                        },
                        Insn::Switch(ref targets) => {
                            for &target in targets {
                                pending_edges.push((index, target));
                            }
                            None
                        },
                        Insn::Exit => None,
                        _ => Some(index),
                    };
                },
            }
        }

        // Labels still open here bind to the method end; edges into them lead nowhere and are dropped below.
        let declared_at_end = open_labels;

        // Resolve the pending jump edges now that every label is known. The first edge into a node wins: a target
        // that already has a fallthrough predecessor is a merge point, and the probe walk must stop there rather
        // than follow an arbitrary branch.
        for (source, label) in pending_edges {
            match bound_labels.get(&label) {
                Some(&target) => {
                    let node = &mut nodes[target];
                    if node.pred.is_none() && target != source {
                        node.pred = Some(source);
                    }
                },
                None => {
                    ensure!(declared_at_end.contains(&label), ErrorKind::UnboundLabel(label.0));
                },
            }
        }

        Ok(MethodFlow { nodes, attached })
    }

    /// Derives the line range of every probe attached to this method, writing them into the class-wide flat `probes`
    /// list.
    fn record_probes(&self, probes: &mut Vec<Option<LineRange>>) -> Result<()> {
        for &(probe, node) in &self.attached {
            let slot = probe as usize;
            ensure!(slot < probes.len(), ErrorKind::ProbeOutOfRange(probe, probes.len()));
            ensure!(probes[slot].is_none(), ErrorKind::DuplicateProbe(probe));
            probes[slot] = self.walk_lines(node);
        }
        Ok(())
    }

    /// Walks the predecessor chain backwards from `start`, widening a line range with every distinct line
    /// encountered, until a node without predecessor is reached.
    fn walk_lines(&self, start: usize) -> Option<LineRange> {
        let mut range: Option<LineRange> = None;
        // pred links of backward jumps can close a loop; never visit a node twice.
        let mut visited = FixedBitSet::with_capacity(self.nodes.len());
        let mut cursor = Some(start);
        while let Some(index) = cursor {
            if visited.contains(index) {
                break;
            }
            visited.insert(index);
            let node = &self.nodes[index];
            if let Some(line) = node.line {
                match range {
                    Some(ref mut range) => range.adjust_to_contain(line),
                    None => range = Some(LineRange::new(line)),
                }
            }
            cursor = node.pred;
        }
        range
    }
}

//}}}
