//! Structured module → binary encoding.
//!
//! The exact inverse of decoding.  Section byte lengths are never carried
//! over from a previous decode; every section is re-serialized into a
//! scratch buffer and its length derived from the result, so a module that
//! was decoded and re-encoded without modification is byte-identical to the
//! input.

use crate::decode::{MAGIC, VERSION};
use crate::error::{CodecError, CodecResult};
use crate::module::*;
use crate::opcode::{Encoding, Immediate, ImmediateRule, Op, EXT_PREFIX};

fn unsupported(msg: impl Into<String>) -> CodecError {
    CodecError::UnsupportedStructure(msg.into())
}

// ── Byte writer ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn byte(&mut self, byte: u8) {
        self.out.push(byte);
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    fn varuint(&mut self, value: u32) {
        leb128::write::unsigned(&mut self.out, u64::from(value))
            .expect("writing to a Vec cannot fail");
    }

    fn varint(&mut self, value: i64) {
        leb128::write::signed(&mut self.out, value).expect("writing to a Vec cannot fail");
    }

    fn string(&mut self, value: &str) {
        self.varuint(value.len() as u32);
        self.bytes(value.as_bytes());
    }
}

// ── Module encoding ──────────────────────────────────────────────────────────

pub(crate) fn encode_module(module: &Module) -> CodecResult<Vec<u8>> {
    let mut out = Writer::default();
    out.bytes(&MAGIC);
    out.bytes(&VERSION);

    for section in &module.sections {
        let mut body = Writer::default();
        match section {
            Section::Custom(custom) => {
                body.string(&custom.name);
                body.bytes(&custom.payload);
            }
            Section::Type(entries) => {
                body.varuint(entries.len() as u32);
                for ty in entries {
                    write_func_type(&mut body, ty);
                }
            }
            Section::Import(entries) => {
                body.varuint(entries.len() as u32);
                for entry in entries {
                    write_import(&mut body, entry)?;
                }
            }
            Section::Function(entries) => {
                body.varuint(entries.len() as u32);
                for index in entries {
                    body.varuint(index.0);
                }
            }
            Section::Table(entries) => {
                body.varuint(entries.len() as u32);
                for table in entries {
                    body.byte(table.element_type.byte());
                    write_limits(&mut body, &table.limits)?;
                }
            }
            Section::Memory(entries) => {
                body.varuint(entries.len() as u32);
                for limits in entries {
                    write_limits(&mut body, limits)?;
                }
            }
            Section::Global(entries) => {
                body.varuint(entries.len() as u32);
                for global in entries {
                    write_global_type(&mut body, &global.ty);
                    write_init_expr(&mut body, &global.init)?;
                }
            }
            Section::Export(entries) => {
                body.varuint(entries.len() as u32);
                for entry in entries {
                    body.string(&entry.field);
                    body.byte(entry.kind.byte());
                    body.varuint(entry.index);
                }
            }
            Section::Start(index) => {
                body.varuint(index.0);
            }
            Section::Element(entries) => {
                body.varuint(entries.len() as u32);
                for entry in entries {
                    body.varuint(entry.table);
                    write_init_expr(&mut body, &entry.offset)?;
                    body.varuint(entry.elements.len() as u32);
                    for element in &entry.elements {
                        body.varuint(element.0);
                    }
                }
            }
            Section::Code(entries) => {
                body.varuint(entries.len() as u32);
                for entry in entries {
                    write_code_entry(&mut body, entry)?;
                }
            }
            Section::Data(entries) => {
                body.varuint(entries.len() as u32);
                for entry in entries {
                    body.varuint(entry.memory);
                    write_init_expr(&mut body, &entry.offset)?;
                    body.varuint(entry.data.len() as u32);
                    body.bytes(&entry.data);
                }
            }
            Section::DataCount(count) => {
                body.varuint(*count);
            }
        }

        out.byte(section.id().byte());
        out.varuint(body.out.len() as u32);
        out.bytes(&body.out);
    }

    Ok(out.out)
}

fn write_func_type(w: &mut Writer, ty: &FuncType) {
    w.byte(crate::opcode::TypeCode::Func.byte());
    w.varuint(ty.params.len() as u32);
    for param in &ty.params {
        w.byte(param.byte());
    }
    match ty.return_type {
        Some(ret) => {
            w.varuint(1);
            w.byte(ret.byte());
        }
        None => w.varuint(0),
    }
}

fn write_limits(w: &mut Writer, limits: &ResizableLimits) -> CodecResult<()> {
    w.varuint(limits.flags);
    w.varuint(limits.initial);
    match (limits.flags, limits.maximum) {
        (1, Some(maximum)) => w.varuint(maximum),
        (1, None) => return Err(unsupported("bounded limits without a maximum")),
        (_, Some(_)) => return Err(unsupported("unbounded limits carry a maximum")),
        (_, None) => {}
    }
    Ok(())
}

fn write_global_type(w: &mut Writer, ty: &GlobalType) {
    w.byte(ty.content_type.byte());
    w.byte(u8::from(ty.mutable));
}

fn write_import(w: &mut Writer, entry: &ImportEntry) -> CodecResult<()> {
    w.string(&entry.module);
    w.string(&entry.field);
    w.byte(entry.descriptor.kind().byte());
    match &entry.descriptor {
        ImportDescriptor::Function(type_index) => w.varuint(type_index.0),
        ImportDescriptor::Table(table) => {
            w.byte(table.element_type.byte());
            write_limits(w, &table.limits)?;
        }
        ImportDescriptor::Memory(limits) => write_limits(w, limits)?,
        ImportDescriptor::Global(ty) => write_global_type(w, ty),
    }
    Ok(())
}

fn write_init_expr(w: &mut Writer, op: &Op) -> CodecResult<()> {
    write_op(w, op)?;
    w.byte(0x0B);
    Ok(())
}

fn write_code_entry(w: &mut Writer, entry: &CodeEntry) -> CodecResult<()> {
    let mut body = Writer::default();
    body.varuint(entry.locals.len() as u32);
    for local in &entry.locals {
        body.varuint(local.count);
        body.byte(local.ty.byte());
    }
    for op in &entry.code {
        write_op(&mut body, op)?;
    }
    w.varuint(body.out.len() as u32);
    w.bytes(&body.out);
    Ok(())
}

fn write_op(w: &mut Writer, op: &Op) -> CodecResult<()> {
    match op.opcode.encoding() {
        Encoding::Plain(byte) => w.byte(byte),
        Encoding::Ext(sub) => {
            w.byte(EXT_PREFIX);
            w.varuint(sub);
        }
    }

    match (op.opcode.immediate_rule(), &op.immediate) {
        (ImmediateRule::None, Immediate::None) => {}
        (ImmediateRule::Byte, Immediate::Byte(byte)) => w.byte(*byte),
        (ImmediateRule::Varuint, Immediate::Varuint(value)) => w.varuint(*value),
        (ImmediateRule::FuncIdx, Immediate::Func(index)) => w.varuint(index.0),
        (ImmediateRule::GlobalIdx, Immediate::Global(index)) => w.varuint(index.0),
        (ImmediateRule::Varint32, Immediate::Varint32(value)) => w.varint(i64::from(*value)),
        (ImmediateRule::Varint64, Immediate::Varint64(value)) => w.varint(*value),
        (ImmediateRule::F32, Immediate::F32(bytes)) => w.bytes(bytes),
        (ImmediateRule::F64, Immediate::F64(bytes)) => w.bytes(bytes),
        (ImmediateRule::BlockType, Immediate::BlockType(ty)) => w.byte(ty.byte()),
        (ImmediateRule::BrTable, Immediate::BrTable { targets, default }) => {
            w.varuint(targets.len() as u32);
            for target in targets {
                w.varuint(*target);
            }
            w.varuint(*default);
        }
        (
            ImmediateRule::CallIndirect,
            Immediate::CallIndirect {
                type_index,
                reserved,
            },
        ) => {
            w.varuint(type_index.0);
            w.byte(*reserved);
        }
        (ImmediateRule::Memory, Immediate::Memory { flags, offset }) => {
            w.varuint(*flags);
            w.varuint(*offset);
        }
        (rule, immediate) => {
            return Err(unsupported(format!(
                "{} expects a {rule:?} immediate, found {immediate:?}",
                op.opcode.name()
            )))
        }
    }

    Ok(())
}
