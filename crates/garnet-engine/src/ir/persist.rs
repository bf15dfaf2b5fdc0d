//! Binary encoding of IR units
//!
//! Format:
//! - Header: magic `GIR\0` (4 bytes) + version (u32) + crc32 of the payload (u32)
//! - Payload: one unit
//!
//! A unit is its name, kind, arity, local count and instruction list. Each
//! instruction is stored in flat form: operation code, optional result
//! variable, then its operands in order. Closure operands embed their unit
//! recursively. Decoding goes back through `Instr::from_parts` and
//! `IrUnit::new`, so decoded units are validated like built ones and get
//! fresh call sites.
//!
//! All integers are little-endian.

use super::instr::{Instr, ResultInstr};
use super::operand::{Label, Literal, Operand, Variable};
use super::operation::Operation;
use super::unit::{IrUnit, UnitKind};
use crate::error::PersistError;
use crate::runtime::{Arity, Symbol};
use std::path::Path;
use std::sync::Arc;

/// Magic number for persisted IR
pub const MAGIC: [u8; 4] = *b"GIR\0";

/// Current format version
pub const VERSION: u32 = 1;

const HEADER_LEN: usize = 12;

/// Largest accepted local slot count per unit
pub const MAX_LOCALS: u32 = 1 << 16;

/// Largest accepted temporary id
pub const MAX_TEMP_ID: u32 = 1 << 20;

/// Deepest accepted nesting of closures and compound operands
pub const MAX_NESTING: usize = 64;

/// Encode a unit
pub fn encode(unit: &IrUnit) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.buffer.extend_from_slice(&MAGIC);
    writer.emit_u32(VERSION);
    let crc32_offset = writer.offset();
    writer.emit_u32(0); // Placeholder for CRC32

    encode_unit(&mut writer, unit);

    let crc32 = crc32fast::hash(&writer.buffer[HEADER_LEN..]);
    writer.patch_u32(crc32_offset, crc32);
    writer.buffer
}

/// Decode and validate a unit
pub fn decode(data: &[u8]) -> Result<IrUnit, PersistError> {
    let mut reader = Reader::new(data);
    if reader.read_bytes(4)? != MAGIC {
        return Err(PersistError::BadMagic);
    }
    let version = reader.read_u32()?;
    if version != VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }
    let stored_crc32 = reader.read_u32()?;
    let calculated_crc32 = crc32fast::hash(&data[HEADER_LEN..]);
    if stored_crc32 != calculated_crc32 {
        return Err(PersistError::ChecksumMismatch {
            expected: stored_crc32,
            computed: calculated_crc32,
        });
    }

    decode_unit(&mut reader)
}

/// Encode `unit` into a file
pub fn write_to_file(unit: &IrUnit, path: impl AsRef<Path>) -> Result<(), PersistError> {
    std::fs::write(path, encode(unit))?;
    Ok(())
}

/// Decode a unit from a file
pub fn read_from_file(path: impl AsRef<Path>) -> Result<IrUnit, PersistError> {
    let data = std::fs::read(path)?;
    decode(&data)
}

// ============================================================================
// Encoding
// ============================================================================

fn encode_unit(w: &mut Writer, unit: &IrUnit) {
    w.emit_string(unit.name());
    w.emit_u8(unit.kind().code());
    let arity = unit.arity();
    w.emit_u32(arity.required as u32);
    w.emit_u32(arity.optional as u32);
    w.emit_u8(arity.rest as u8);
    w.emit_u32(unit.local_count());

    w.emit_u32(unit.instrs().len() as u32);
    for instr in unit.instrs() {
        w.emit_u8(instr.operation().code());
        match instr.result() {
            Some(var) => {
                w.emit_u8(1);
                encode_variable(w, var);
            }
            None => w.emit_u8(0),
        }
        let operands = instr.operands();
        w.emit_u32(operands.len() as u32);
        for op in &operands {
            encode_operand(w, op);
        }
    }
}

fn encode_variable(w: &mut Writer, var: &Variable) {
    match var {
        Variable::Temp(id) => {
            w.emit_u8(0);
            w.emit_u32(*id);
        }
        Variable::Local { name, depth, slot } => {
            w.emit_u8(1);
            w.emit_string(&name.as_str());
            w.emit_u32(*depth);
            w.emit_u32(*slot);
        }
    }
}

fn encode_operand(w: &mut Writer, op: &Operand) {
    match op {
        Operand::Literal(lit) => {
            w.emit_u8(0);
            encode_literal(w, lit);
        }
        Operand::Variable(var) => {
            w.emit_u8(1);
            encode_variable(w, var);
        }
        Operand::Label(label) => {
            w.emit_u8(2);
            w.emit_u32(label.0);
        }
        Operand::SelfRef => w.emit_u8(3),
        Operand::CurrentModule => w.emit_u8(4),
        Operand::Splat(inner) => {
            w.emit_u8(5);
            encode_operand(w, inner);
        }
        Operand::Array(elements) => {
            w.emit_u8(6);
            w.emit_u32(elements.len() as u32);
            for e in elements {
                encode_operand(w, e);
            }
        }
        Operand::Closure(unit) => {
            w.emit_u8(7);
            encode_unit(w, unit);
        }
    }
}

fn encode_literal(w: &mut Writer, lit: &Literal) {
    match lit {
        Literal::Nil => w.emit_u8(0),
        Literal::Bool(b) => {
            w.emit_u8(1);
            w.emit_u8(*b as u8);
        }
        Literal::Fixnum(n) => {
            w.emit_u8(2);
            w.emit_u64(*n as u64);
        }
        Literal::Float(x) => {
            w.emit_u8(3);
            w.emit_u64(x.to_bits());
        }
        Literal::Str(s) => {
            w.emit_u8(4);
            w.emit_string(s);
        }
        Literal::Symbol(s) => {
            w.emit_u8(5);
            w.emit_string(&s.as_str());
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

fn decode_unit(r: &mut Reader<'_>) -> Result<IrUnit, PersistError> {
    let name = r.read_string()?;
    let kind_tag = r.read_u8()?;
    let kind = UnitKind::from_code(kind_tag).ok_or(PersistError::InvalidTag {
        kind: "unit kind",
        tag: kind_tag,
    })?;
    let arity = Arity {
        required: r.read_u32()? as usize,
        optional: r.read_u32()? as usize,
        rest: r.read_u8()? != 0,
    };
    let local_count = limit("local count", r.read_u32()?, MAX_LOCALS)?;

    let count = r.read_u32()? as usize;
    let mut instrs = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let code = r.read_u8()?;
        let op = Operation::from_code(code).ok_or(PersistError::InvalidTag {
            kind: "operation",
            tag: code,
        })?;
        let result = match r.read_u8()? {
            0 => None,
            1 => Some(decode_variable(r)?),
            tag => {
                return Err(PersistError::InvalidTag {
                    kind: "result flag",
                    tag,
                })
            }
        };
        let n = r.read_u32()? as usize;
        let mut operands = Vec::with_capacity(n.min(256));
        for _ in 0..n {
            operands.push(decode_operand(r)?);
        }
        instrs.push(Instr::from_parts(op, result, operands)?);
    }

    Ok(IrUnit::new(&name, kind, arity, local_count, instrs)?)
}

fn decode_variable(r: &mut Reader<'_>) -> Result<Variable, PersistError> {
    match r.read_u8()? {
        0 => Ok(Variable::Temp(limit("temp id", r.read_u32()?, MAX_TEMP_ID)?)),
        1 => Ok(Variable::Local {
            name: Symbol::intern(&r.read_string()?),
            depth: r.read_u32()?,
            slot: r.read_u32()?,
        }),
        tag => Err(PersistError::InvalidTag {
            kind: "variable",
            tag,
        }),
    }
}

fn decode_operand(r: &mut Reader<'_>) -> Result<Operand, PersistError> {
    let op = match r.read_u8()? {
        0 => Operand::Literal(decode_literal(r)?),
        1 => Operand::Variable(decode_variable(r)?),
        2 => Operand::Label(Label(r.read_u32()?)),
        3 => Operand::SelfRef,
        4 => Operand::CurrentModule,
        5 => Operand::Splat(Box::new(r.nested(decode_operand)?)),
        6 => r.nested(|r| {
            let n = r.read_u32()? as usize;
            let mut elements = Vec::with_capacity(n.min(256));
            for _ in 0..n {
                elements.push(decode_operand(r)?);
            }
            Ok(Operand::Array(elements))
        })?,
        7 => Operand::Closure(Arc::new(r.nested(decode_unit)?)),
        tag => {
            return Err(PersistError::InvalidTag {
                kind: "operand",
                tag,
            })
        }
    };
    Ok(op)
}

fn decode_literal(r: &mut Reader<'_>) -> Result<Literal, PersistError> {
    let lit = match r.read_u8()? {
        0 => Literal::Nil,
        1 => Literal::Bool(r.read_u8()? != 0),
        2 => Literal::Fixnum(r.read_u64()? as i64),
        3 => Literal::Float(f64::from_bits(r.read_u64()?)),
        4 => Literal::Str(Arc::from(r.read_string()?)),
        5 => Literal::Symbol(Symbol::intern(&r.read_string()?)),
        tag => {
            return Err(PersistError::InvalidTag {
                kind: "literal",
                tag,
            })
        }
    };
    Ok(lit)
}

fn limit(what: &'static str, value: u32, max: u32) -> Result<u32, PersistError> {
    if value > max {
        return Err(PersistError::LimitExceeded {
            what,
            value: value as u64,
            max: max as u64,
        });
    }
    Ok(value)
}

// ============================================================================
// Byte buffers
// ============================================================================

struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    fn offset(&self) -> usize {
        self.buffer.len()
    }

    fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn emit_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn emit_string(&mut self, s: &str) {
        self.emit_u32(s.len() as u32);
        self.buffer.extend_from_slice(s.as_bytes());
    }

    fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, depth: 0 }
    }

    /// Decode one nesting level deeper
    fn nested<T>(
        &mut self,
        decode: impl FnOnce(&mut Self) -> Result<T, PersistError>,
    ) -> Result<T, PersistError> {
        if self.depth >= MAX_NESTING {
            return Err(PersistError::LimitExceeded {
                what: "nesting depth",
                value: self.depth as u64 + 1,
                max: MAX_NESTING as u64,
            });
        }
        self.depth += 1;
        let result = decode(self);
        self.depth -= 1;
        result
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], PersistError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(PersistError::UnexpectedEof(self.pos))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, PersistError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, PersistError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64, PersistError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_string(&mut self) -> Result<String, PersistError> {
        let len = self.read_u32()? as usize;
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PersistError::InvalidUtf8(start))
    }
}
