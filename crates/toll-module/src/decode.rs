//! Binary → structured module decoding.
//!
//! The decoder reads the 8-byte preamble, then loops over section headers
//! (1-byte id + LEB128 byte length) and hands each payload to a per-kind
//! entry parser.  Every parser must consume exactly the declared length;
//! anything else is a [`CodecError::MalformedBinary`].

use std::io::{Cursor, Read};

use crate::error::{CodecError, CodecResult};
use crate::module::*;
use crate::opcode::{Immediate, ImmediateRule, Op, Opcode, TypeCode, EXT_PREFIX};

/// `\0asm`
pub const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];
/// Binary format version 1.
pub const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

fn malformed(msg: impl Into<String>) -> CodecError {
    CodecError::MalformedBinary(msg.into())
}

// ── Byte reader ──────────────────────────────────────────────────────────────

/// Forward-only reader over the input bytes with position tracking.
struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    fn is_at_end(&self) -> bool {
        self.position() >= self.cursor.get_ref().len()
    }

    fn byte(&mut self) -> CodecResult<u8> {
        let mut buf = [0u8; 1];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| malformed("unexpected end of input"))?;
        Ok(buf[0])
    }

    fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| malformed("unexpected end of input"))?;
        Ok(buf)
    }

    fn bytes(&mut self, len: usize) -> CodecResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| malformed("unexpected end of input"))?;
        Ok(buf)
    }

    fn varuint32(&mut self) -> CodecResult<u32> {
        let value = leb128::read::unsigned(&mut self.cursor)
            .map_err(|e| malformed(format!("bad unsigned varint: {e}")))?;
        u32::try_from(value).map_err(|_| malformed("varuint32 out of range"))
    }

    fn varint32(&mut self) -> CodecResult<i32> {
        let value = leb128::read::signed(&mut self.cursor)
            .map_err(|e| malformed(format!("bad signed varint: {e}")))?;
        i32::try_from(value).map_err(|_| malformed("varint32 out of range"))
    }

    fn varint64(&mut self) -> CodecResult<i64> {
        leb128::read::signed(&mut self.cursor)
            .map_err(|e| malformed(format!("bad signed varint: {e}")))
    }

    fn type_code(&mut self) -> CodecResult<TypeCode> {
        let byte = self.byte()?;
        TypeCode::from_byte(byte)
            .ok_or_else(|| malformed(format!("unknown type byte 0x{byte:02X}")))
    }

    fn string(&mut self) -> CodecResult<String> {
        let len = self.varuint32()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes).map_err(|_| malformed("name is not valid UTF-8"))
    }
}

// ── Entry parsing ────────────────────────────────────────────────────────────

pub(crate) fn decode_module(bytes: &[u8]) -> CodecResult<Module> {
    let mut r = Reader::new(bytes);

    if r.array::<4>()? != MAGIC {
        return Err(malformed("bad magic number"));
    }
    if r.array::<4>()? != VERSION {
        return Err(malformed("unsupported version"));
    }

    let mut sections = Vec::new();
    while !r.is_at_end() {
        let id_byte = r.byte()?;
        let id = SectionId::from_byte(id_byte)
            .ok_or_else(|| malformed(format!("unknown section id {id_byte}")))?;
        let size = r.varuint32()? as usize;
        let start = r.position();

        let section = match id {
            SectionId::Custom => Section::Custom(parse_custom(&mut r, start, size)?),
            SectionId::Type => Section::Type(parse_vec(&mut r, parse_func_type)?),
            SectionId::Import => Section::Import(parse_vec(&mut r, parse_import)?),
            SectionId::Function => {
                Section::Function(parse_vec(&mut r, |r| Ok(TypeIndex(r.varuint32()?)))?)
            }
            SectionId::Table => Section::Table(parse_vec(&mut r, parse_table_type)?),
            SectionId::Memory => Section::Memory(parse_vec(&mut r, parse_limits)?),
            SectionId::Global => Section::Global(parse_vec(&mut r, parse_global)?),
            SectionId::Export => Section::Export(parse_vec(&mut r, parse_export)?),
            SectionId::Start => Section::Start(FuncIndex(r.varuint32()?)),
            SectionId::Element => Section::Element(parse_vec(&mut r, parse_element)?),
            SectionId::Code => Section::Code(parse_vec(&mut r, parse_code_entry)?),
            SectionId::Data => Section::Data(parse_vec(&mut r, parse_data)?),
            SectionId::DataCount => Section::DataCount(r.varuint32()?),
        };

        let consumed = r.position() - start;
        if consumed != size {
            return Err(malformed(format!(
                "section id {id_byte} declares {size} bytes but its entries span {consumed}"
            )));
        }
        sections.push(section);
    }

    Ok(Module { sections })
}

fn parse_vec<T>(
    r: &mut Reader<'_>,
    parse: impl Fn(&mut Reader<'_>) -> CodecResult<T>,
) -> CodecResult<Vec<T>> {
    let count = r.varuint32()? as usize;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        entries.push(parse(r)?);
    }
    Ok(entries)
}

fn parse_custom(r: &mut Reader<'_>, start: usize, size: usize) -> CodecResult<CustomSection> {
    let name = r.string()?;
    let consumed = r.position() - start;
    let remaining = size
        .checked_sub(consumed)
        .ok_or_else(|| malformed("custom section name overruns its payload"))?;
    let payload = r.bytes(remaining)?;
    Ok(CustomSection { name, payload })
}

fn parse_func_type(r: &mut Reader<'_>) -> CodecResult<FuncType> {
    let form = r.type_code()?;
    if form != TypeCode::Func {
        return Err(malformed("type entry is not a function type"));
    }
    let param_count = r.varuint32()? as usize;
    let mut params = Vec::with_capacity(param_count.min(1024));
    for _ in 0..param_count {
        params.push(r.type_code()?);
    }
    let return_count = r.varuint32()?;
    let return_type = if return_count != 0 {
        Some(r.type_code()?)
    } else {
        None
    };
    Ok(FuncType {
        params,
        return_type,
    })
}

fn parse_limits(r: &mut Reader<'_>) -> CodecResult<ResizableLimits> {
    let flags = r.varuint32()?;
    let initial = r.varuint32()?;
    let maximum = if flags == 1 {
        Some(r.varuint32()?)
    } else {
        None
    };
    Ok(ResizableLimits {
        flags,
        initial,
        maximum,
    })
}

fn parse_table_type(r: &mut Reader<'_>) -> CodecResult<TableType> {
    let element_type = r.type_code()?;
    let limits = parse_limits(r)?;
    Ok(TableType {
        element_type,
        limits,
    })
}

fn parse_global_type(r: &mut Reader<'_>) -> CodecResult<GlobalType> {
    let content_type = r.type_code()?;
    let mutable = r.byte()? != 0;
    Ok(GlobalType {
        content_type,
        mutable,
    })
}

fn parse_import(r: &mut Reader<'_>) -> CodecResult<ImportEntry> {
    let module = r.string()?;
    let field = r.string()?;
    let kind_byte = r.byte()?;
    let kind = ExternalKind::from_byte(kind_byte)
        .ok_or_else(|| malformed(format!("unknown import kind {kind_byte}")))?;
    let descriptor = match kind {
        ExternalKind::Function => ImportDescriptor::Function(TypeIndex(r.varuint32()?)),
        ExternalKind::Table => ImportDescriptor::Table(parse_table_type(r)?),
        ExternalKind::Memory => ImportDescriptor::Memory(parse_limits(r)?),
        ExternalKind::Global => ImportDescriptor::Global(parse_global_type(r)?),
    };
    Ok(ImportEntry {
        module,
        field,
        descriptor,
    })
}

fn parse_global(r: &mut Reader<'_>) -> CodecResult<GlobalEntry> {
    let ty = parse_global_type(r)?;
    let init = parse_init_expr(r)?;
    Ok(GlobalEntry { ty, init })
}

fn parse_export(r: &mut Reader<'_>) -> CodecResult<ExportEntry> {
    let field = r.string()?;
    let kind_byte = r.byte()?;
    let kind = ExternalKind::from_byte(kind_byte)
        .ok_or_else(|| malformed(format!("unknown export kind {kind_byte}")))?;
    let index = r.varuint32()?;
    Ok(ExportEntry { field, kind, index })
}

fn parse_element(r: &mut Reader<'_>) -> CodecResult<ElementEntry> {
    let table = r.varuint32()?;
    let offset = parse_init_expr(r)?;
    let count = r.varuint32()? as usize;
    let mut elements = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        elements.push(FuncIndex(r.varuint32()?));
    }
    Ok(ElementEntry {
        table,
        offset,
        elements,
    })
}

fn parse_code_entry(r: &mut Reader<'_>) -> CodecResult<CodeEntry> {
    let body_size = r.varuint32()? as usize;
    let end = r.position() + body_size;

    let local_count = r.varuint32()? as usize;
    let mut locals = Vec::with_capacity(local_count.min(1024));
    for _ in 0..local_count {
        let count = r.varuint32()?;
        let ty = r.type_code()?;
        locals.push(LocalEntry { count, ty });
    }

    let mut code = Vec::new();
    while r.position() < end {
        code.push(parse_op(r)?);
    }
    if r.position() != end {
        return Err(malformed("code body overruns its declared size"));
    }

    Ok(CodeEntry { locals, code })
}

fn parse_data(r: &mut Reader<'_>) -> CodecResult<DataEntry> {
    let memory = r.varuint32()?;
    let offset = parse_init_expr(r)?;
    let len = r.varuint32()? as usize;
    let data = r.bytes(len)?;
    Ok(DataEntry {
        memory,
        offset,
        data,
    })
}

/// An initializer expression is a single constant op followed by `end`.
fn parse_init_expr(r: &mut Reader<'_>) -> CodecResult<Op> {
    let op = parse_op(r)?;
    let delimiter = r.byte()?;
    if delimiter != 0x0B {
        return Err(malformed("initializer expression is not `end`-terminated"));
    }
    Ok(op)
}

fn parse_op(r: &mut Reader<'_>) -> CodecResult<Op> {
    let byte = r.byte()?;
    let opcode = if byte == EXT_PREFIX {
        let sub = r.varuint32()?;
        Opcode::from_ext(sub)
            .ok_or_else(|| malformed(format!("unknown sub-opcode 0x{sub:02X} after 0xFC")))?
    } else {
        Opcode::from_byte(byte)
            .ok_or_else(|| malformed(format!("unknown opcode 0x{byte:02X}")))?
    };

    let immediate = match opcode.immediate_rule() {
        ImmediateRule::None => Immediate::None,
        ImmediateRule::Byte => Immediate::Byte(r.byte()?),
        ImmediateRule::Varuint => Immediate::Varuint(r.varuint32()?),
        ImmediateRule::FuncIdx => Immediate::Func(FuncIndex(r.varuint32()?)),
        ImmediateRule::GlobalIdx => Immediate::Global(GlobalIndex(r.varuint32()?)),
        ImmediateRule::Varint32 => Immediate::Varint32(r.varint32()?),
        ImmediateRule::Varint64 => Immediate::Varint64(r.varint64()?),
        ImmediateRule::F32 => Immediate::F32(r.array()?),
        ImmediateRule::F64 => Immediate::F64(r.array()?),
        ImmediateRule::BlockType => Immediate::BlockType(r.type_code()?),
        ImmediateRule::BrTable => {
            let count = r.varuint32()? as usize;
            let mut targets = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                targets.push(r.varuint32()?);
            }
            let default = r.varuint32()?;
            Immediate::BrTable { targets, default }
        }
        ImmediateRule::CallIndirect => Immediate::CallIndirect {
            type_index: TypeIndex(r.varuint32()?),
            reserved: r.byte()?,
        },
        ImmediateRule::Memory => Immediate::Memory {
            flags: r.varuint32()?,
            offset: r.varuint32()?,
        },
    };

    Ok(Op { opcode, immediate })
}
