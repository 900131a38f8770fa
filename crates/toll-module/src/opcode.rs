//! Opcode and immediate tables for the wasm MVP instruction set.
//!
//! Every opcode the codec understands lives in the single [`opcodes!`]
//! invocation below: its wire byte (or `0xFC`-prefixed sub-opcode), its
//! dotted display name, and the rule describing the immediate that follows
//! it on the wire.  Decode and encode both read from this one table, so the
//! two directions cannot drift apart.

use crate::module::{FuncIndex, GlobalIndex, TypeIndex};

// ── Value / block types ──────────────────────────────────────────────────────

/// A language type, encoded on the wire as a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    /// `0x7F`
    I32,
    /// `0x7E`
    I64,
    /// `0x7D`
    F32,
    /// `0x7C`
    F64,
    /// `0x70` — function reference (table element type).
    AnyFunc,
    /// `0x60` — function type constructor.
    Func,
    /// `0x40` — empty block type.
    Empty,
}

impl TypeCode {
    /// Decode a type byte, or `None` for an unknown value.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x7F => Some(Self::I32),
            0x7E => Some(Self::I64),
            0x7D => Some(Self::F32),
            0x7C => Some(Self::F64),
            0x70 => Some(Self::AnyFunc),
            0x60 => Some(Self::Func),
            0x40 => Some(Self::Empty),
            _ => None,
        }
    }

    /// The wire byte for this type.
    pub fn byte(self) -> u8 {
        match self {
            Self::I32 => 0x7F,
            Self::I64 => 0x7E,
            Self::F32 => 0x7D,
            Self::F64 => 0x7C,
            Self::AnyFunc => 0x70,
            Self::Func => 0x60,
            Self::Empty => 0x40,
        }
    }

    /// Name used when pricing this type against a cost table.
    pub fn name(self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::AnyFunc => "anyfunc",
            Self::Func => "func",
            Self::Empty => "empty",
        }
    }
}

// ── Immediates ───────────────────────────────────────────────────────────────

/// Shape of the immediate operand carried by an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmediateRule {
    /// No immediate.
    None,
    /// A single raw byte (memory-size operations, `varuint1`).
    Byte,
    /// Unsigned LEB128 (branch depths, local indices).
    Varuint,
    /// Unsigned LEB128 interpreted as a function index.
    FuncIdx,
    /// Unsigned LEB128 interpreted as a global index.
    GlobalIdx,
    /// Signed LEB128, 32-bit (`i32.const`).
    Varint32,
    /// Signed LEB128, 64-bit (`i64.const`).
    Varint64,
    /// Four raw little-endian bytes (`f32.const`).
    F32,
    /// Eight raw little-endian bytes (`f64.const`).
    F64,
    /// A block-type byte.
    BlockType,
    /// Branch table: target list plus default target.
    BrTable,
    /// Type index plus reserved byte (`call_indirect`).
    CallIndirect,
    /// Alignment flags plus offset (loads and stores).
    Memory,
}

/// A decoded immediate value.
///
/// Float constants keep their raw little-endian bytes so that re-encoding a
/// module reproduces the input bit-for-bit, NaN payloads included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Immediate {
    None,
    Byte(u8),
    Varuint(u32),
    Func(FuncIndex),
    Global(GlobalIndex),
    Varint32(i32),
    Varint64(i64),
    F32([u8; 4]),
    F64([u8; 8]),
    BlockType(TypeCode),
    BrTable { targets: Vec<u32>, default: u32 },
    CallIndirect { type_index: TypeIndex, reserved: u8 },
    Memory { flags: u32, offset: u32 },
}

// ── Opcode table ─────────────────────────────────────────────────────────────

/// Wire encoding of an opcode: a plain one-byte opcode, or a sub-opcode
/// behind the `0xFC` extension prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoding {
    Plain(u8),
    Ext(u32),
}

/// Byte value of the extension prefix introducing sub-opcodes.
pub(crate) const EXT_PREFIX: u8 = 0xFC;

macro_rules! opcodes {
    (
        plain { $( $pb:literal => $pv:ident, $pn:literal, $pi:ident; )* }
        ext { $( $eb:literal => $ev:ident, $en:literal; )* }
    ) => {
        /// One wasm instruction, without its immediate.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Opcode {
            $( $pv, )*
            $( $ev, )*
        }

        impl Opcode {
            /// Look up a plain (one-byte) opcode.
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $pb => Some(Self::$pv), )*
                    _ => None,
                }
            }

            /// Look up a sub-opcode behind the `0xFC` prefix.
            pub fn from_ext(sub: u32) -> Option<Self> {
                match sub {
                    $( $eb => Some(Self::$ev), )*
                    _ => None,
                }
            }

            /// The dotted display name, e.g. `i32.add` or `br_if`.
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$pv => $pn, )*
                    $( Self::$ev => $en, )*
                }
            }

            /// The immediate rule for this opcode.
            pub fn immediate_rule(self) -> ImmediateRule {
                match self {
                    $( Self::$pv => ImmediateRule::$pi, )*
                    $( Self::$ev => ImmediateRule::None, )*
                }
            }

            pub(crate) fn encoding(self) -> Encoding {
                match self {
                    $( Self::$pv => Encoding::Plain($pb), )*
                    $( Self::$ev => Encoding::Ext($eb), )*
                }
            }
        }
    };
}

opcodes! {
    plain {
        // Control flow
        0x00 => Unreachable, "unreachable", None;
        0x01 => Nop, "nop", None;
        0x02 => Block, "block", BlockType;
        0x03 => Loop, "loop", BlockType;
        0x04 => If, "if", BlockType;
        0x05 => Else, "else", None;
        0x0B => End, "end", None;
        0x0C => Br, "br", Varuint;
        0x0D => BrIf, "br_if", Varuint;
        0x0E => BrTable, "br_table", BrTable;
        0x0F => Return, "return", None;

        // Calls
        0x10 => Call, "call", FuncIdx;
        0x11 => CallIndirect, "call_indirect", CallIndirect;

        // Parametric operators
        0x1A => Drop, "drop", None;
        0x1B => Select, "select", None;

        // Variable access
        0x20 => GetLocal, "get_local", Varuint;
        0x21 => SetLocal, "set_local", Varuint;
        0x22 => TeeLocal, "tee_local", Varuint;
        0x23 => GetGlobal, "get_global", GlobalIdx;
        0x24 => SetGlobal, "set_global", GlobalIdx;

        // Memory operators
        0x28 => I32Load, "i32.load", Memory;
        0x29 => I64Load, "i64.load", Memory;
        0x2A => F32Load, "f32.load", Memory;
        0x2B => F64Load, "f64.load", Memory;
        0x2C => I32Load8S, "i32.load8_s", Memory;
        0x2D => I32Load8U, "i32.load8_u", Memory;
        0x2E => I32Load16S, "i32.load16_s", Memory;
        0x2F => I32Load16U, "i32.load16_u", Memory;
        0x30 => I64Load8S, "i64.load8_s", Memory;
        0x31 => I64Load8U, "i64.load8_u", Memory;
        0x32 => I64Load16S, "i64.load16_s", Memory;
        0x33 => I64Load16U, "i64.load16_u", Memory;
        0x34 => I64Load32S, "i64.load32_s", Memory;
        0x35 => I64Load32U, "i64.load32_u", Memory;
        0x36 => I32Store, "i32.store", Memory;
        0x37 => I64Store, "i64.store", Memory;
        0x38 => F32Store, "f32.store", Memory;
        0x39 => F64Store, "f64.store", Memory;
        0x3A => I32Store8, "i32.store8", Memory;
        0x3B => I32Store16, "i32.store16", Memory;
        0x3C => I64Store8, "i64.store8", Memory;
        0x3D => I64Store16, "i64.store16", Memory;
        0x3E => I64Store32, "i64.store32", Memory;
        0x3F => CurrentMemory, "current_memory", Byte;
        0x40 => GrowMemory, "grow_memory", Byte;

        // Constants
        0x41 => I32Const, "i32.const", Varint32;
        0x42 => I64Const, "i64.const", Varint64;
        0x43 => F32Const, "f32.const", F32;
        0x44 => F64Const, "f64.const", F64;

        // Comparison operators
        0x45 => I32Eqz, "i32.eqz", None;
        0x46 => I32Eq, "i32.eq", None;
        0x47 => I32Ne, "i32.ne", None;
        0x48 => I32LtS, "i32.lt_s", None;
        0x49 => I32LtU, "i32.lt_u", None;
        0x4A => I32GtS, "i32.gt_s", None;
        0x4B => I32GtU, "i32.gt_u", None;
        0x4C => I32LeS, "i32.le_s", None;
        0x4D => I32LeU, "i32.le_u", None;
        0x4E => I32GeS, "i32.ge_s", None;
        0x4F => I32GeU, "i32.ge_u", None;
        0x50 => I64Eqz, "i64.eqz", None;
        0x51 => I64Eq, "i64.eq", None;
        0x52 => I64Ne, "i64.ne", None;
        0x53 => I64LtS, "i64.lt_s", None;
        0x54 => I64LtU, "i64.lt_u", None;
        0x55 => I64GtS, "i64.gt_s", None;
        0x56 => I64GtU, "i64.gt_u", None;
        0x57 => I64LeS, "i64.le_s", None;
        0x58 => I64LeU, "i64.le_u", None;
        0x59 => I64GeS, "i64.ge_s", None;
        0x5A => I64GeU, "i64.ge_u", None;
        0x5B => F32Eq, "f32.eq", None;
        0x5C => F32Ne, "f32.ne", None;
        0x5D => F32Lt, "f32.lt", None;
        0x5E => F32Gt, "f32.gt", None;
        0x5F => F32Le, "f32.le", None;
        0x60 => F32Ge, "f32.ge", None;
        0x61 => F64Eq, "f64.eq", None;
        0x62 => F64Ne, "f64.ne", None;
        0x63 => F64Lt, "f64.lt", None;
        0x64 => F64Gt, "f64.gt", None;
        0x65 => F64Le, "f64.le", None;
        0x66 => F64Ge, "f64.ge", None;

        // Numeric operators
        0x67 => I32Clz, "i32.clz", None;
        0x68 => I32Ctz, "i32.ctz", None;
        0x69 => I32Popcnt, "i32.popcnt", None;
        0x6A => I32Add, "i32.add", None;
        0x6B => I32Sub, "i32.sub", None;
        0x6C => I32Mul, "i32.mul", None;
        0x6D => I32DivS, "i32.div_s", None;
        0x6E => I32DivU, "i32.div_u", None;
        0x6F => I32RemS, "i32.rem_s", None;
        0x70 => I32RemU, "i32.rem_u", None;
        0x71 => I32And, "i32.and", None;
        0x72 => I32Or, "i32.or", None;
        0x73 => I32Xor, "i32.xor", None;
        0x74 => I32Shl, "i32.shl", None;
        0x75 => I32ShrS, "i32.shr_s", None;
        0x76 => I32ShrU, "i32.shr_u", None;
        0x77 => I32Rotl, "i32.rotl", None;
        0x78 => I32Rotr, "i32.rotr", None;
        0x79 => I64Clz, "i64.clz", None;
        0x7A => I64Ctz, "i64.ctz", None;
        0x7B => I64Popcnt, "i64.popcnt", None;
        0x7C => I64Add, "i64.add", None;
        0x7D => I64Sub, "i64.sub", None;
        0x7E => I64Mul, "i64.mul", None;
        0x7F => I64DivS, "i64.div_s", None;
        0x80 => I64DivU, "i64.div_u", None;
        0x81 => I64RemS, "i64.rem_s", None;
        0x82 => I64RemU, "i64.rem_u", None;
        0x83 => I64And, "i64.and", None;
        0x84 => I64Or, "i64.or", None;
        0x85 => I64Xor, "i64.xor", None;
        0x86 => I64Shl, "i64.shl", None;
        0x87 => I64ShrS, "i64.shr_s", None;
        0x88 => I64ShrU, "i64.shr_u", None;
        0x89 => I64Rotl, "i64.rotl", None;
        0x8A => I64Rotr, "i64.rotr", None;
        0x8B => F32Abs, "f32.abs", None;
        0x8C => F32Neg, "f32.neg", None;
        0x8D => F32Ceil, "f32.ceil", None;
        0x8E => F32Floor, "f32.floor", None;
        0x8F => F32Trunc, "f32.trunc", None;
        0x90 => F32Nearest, "f32.nearest", None;
        0x91 => F32Sqrt, "f32.sqrt", None;
        0x92 => F32Add, "f32.add", None;
        0x93 => F32Sub, "f32.sub", None;
        0x94 => F32Mul, "f32.mul", None;
        0x95 => F32Div, "f32.div", None;
        0x96 => F32Min, "f32.min", None;
        0x97 => F32Max, "f32.max", None;
        0x98 => F32Copysign, "f32.copysign", None;
        0x99 => F64Abs, "f64.abs", None;
        0x9A => F64Neg, "f64.neg", None;
        0x9B => F64Ceil, "f64.ceil", None;
        0x9C => F64Floor, "f64.floor", None;
        0x9D => F64Trunc, "f64.trunc", None;
        0x9E => F64Nearest, "f64.nearest", None;
        0x9F => F64Sqrt, "f64.sqrt", None;
        0xA0 => F64Add, "f64.add", None;
        0xA1 => F64Sub, "f64.sub", None;
        0xA2 => F64Mul, "f64.mul", None;
        0xA3 => F64Div, "f64.div", None;
        0xA4 => F64Min, "f64.min", None;
        0xA5 => F64Max, "f64.max", None;
        0xA6 => F64Copysign, "f64.copysign", None;

        // Conversions
        0xA7 => I32WrapI64, "i32.wrap/i64", None;
        0xA8 => I32TruncSF32, "i32.trunc_s/f32", None;
        0xA9 => I32TruncUF32, "i32.trunc_u/f32", None;
        0xAA => I32TruncSF64, "i32.trunc_s/f64", None;
        0xAB => I32TruncUF64, "i32.trunc_u/f64", None;
        0xAC => I64ExtendSI32, "i64.extend_s/i32", None;
        0xAD => I64ExtendUI32, "i64.extend_u/i32", None;
        0xAE => I64TruncSF32, "i64.trunc_s/f32", None;
        0xAF => I64TruncUF32, "i64.trunc_u/f32", None;
        0xB0 => I64TruncSF64, "i64.trunc_s/f64", None;
        0xB1 => I64TruncUF64, "i64.trunc_u/f64", None;
        0xB2 => F32ConvertSI32, "f32.convert_s/i32", None;
        0xB3 => F32ConvertUI32, "f32.convert_u/i32", None;
        0xB4 => F32ConvertSI64, "f32.convert_s/i64", None;
        0xB5 => F32ConvertUI64, "f32.convert_u/i64", None;
        0xB6 => F32DemoteF64, "f32.demote/f64", None;
        0xB7 => F64ConvertSI32, "f64.convert_s/i32", None;
        0xB8 => F64ConvertUI32, "f64.convert_u/i32", None;
        0xB9 => F64ConvertSI64, "f64.convert_s/i64", None;
        0xBA => F64ConvertUI64, "f64.convert_u/i64", None;
        0xBB => F64PromoteF32, "f64.promote/f32", None;

        // Reinterpretations
        0xBC => I32ReinterpretF32, "i32.reinterpret/f32", None;
        0xBD => I64ReinterpretF64, "i64.reinterpret/f64", None;
        0xBE => F32ReinterpretI32, "f32.reinterpret/i32", None;
        0xBF => F64ReinterpretI64, "f64.reinterpret/i64", None;

        // Sign extension
        0xC0 => I32Extend8S, "i32.extend8_s", None;
        0xC1 => I32Extend16S, "i32.extend16_s", None;
        0xC2 => I64Extend8S, "i64.extend8_s", None;
        0xC3 => I64Extend16S, "i64.extend16_s", None;
        0xC4 => I64Extend32S, "i64.extend32_s", None;
    }
    ext {
        // Saturating truncation
        0x00 => I32TruncSatF32S, "i32.trunc_sat_f32_s";
        0x01 => I32TruncSatF32U, "i32.trunc_sat_f32_u";
        0x02 => I32TruncSatF64S, "i32.trunc_sat_f64_s";
        0x03 => I32TruncSatF64U, "i32.trunc_sat_f64_u";
        0x04 => I64TruncSatF32S, "i64.trunc_sat_f32_s";
        0x05 => I64TruncSatF32U, "i64.trunc_sat_f32_u";
        0x06 => I64TruncSatF64S, "i64.trunc_sat_f64_s";
        0x07 => I64TruncSatF64U, "i64.trunc_sat_f64_u";

        // Bulk memory / table family (recognized; immediates unsupported)
        0x08 => MemoryInit, "memory.init";
        0x09 => DataDrop, "data.drop";
        0x0A => MemoryCopy, "memory.copy";
        0x0B => MemoryFill, "memory.fill";
        0x0C => TableInit, "table.init";
        0x0D => ElemDrop, "elem.drop";
        0x0E => TableCopy, "table.copy";
        0x0F => TableGrow, "table.grow";
        0x10 => TableSize, "table.size";
        0x11 => TableFill, "table.fill";
    }
}

impl Opcode {
    /// Key used when pricing this opcode against the `code.code` cost
    /// table: the part of the dotted name after the type prefix, or the
    /// bare name when there is none.  `i32.add` prices as `add`, every
    /// `*.const` prices as `const`, `br_if` prices as `br_if`.
    pub fn cost_key(self) -> &'static str {
        let name = self.name();
        match name.split_once('.') {
            Some((_, op)) => op,
            None => name,
        }
    }

    /// Whether control may leave or re-enter the surrounding code at this
    /// instruction.  These opcodes end a metering segment.
    pub fn is_branching(self) -> bool {
        matches!(
            self,
            Self::Loop
                | Self::End
                | Self::If
                | Self::Else
                | Self::Br
                | Self::BrTable
                | Self::BrIf
                | Self::Call
                | Self::CallIndirect
                | Self::Return
        )
    }
}

// ── Operations ───────────────────────────────────────────────────────────────

/// One instruction together with its immediate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub opcode: Opcode,
    pub immediate: Immediate,
}

impl Op {
    pub fn new(opcode: Opcode, immediate: Immediate) -> Self {
        Self { opcode, immediate }
    }

    /// An instruction with no immediate.
    pub fn plain(opcode: Opcode) -> Self {
        Self::new(opcode, Immediate::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bytes_round_trip() {
        for byte in 0u8..=0xC4 {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op.encoding(), Encoding::Plain(byte), "{}", op.name());
            }
        }
    }

    #[test]
    fn ext_sub_opcodes_round_trip() {
        for sub in 0u32..=0x11 {
            let op = Opcode::from_ext(sub).expect("sub-opcode in table");
            assert_eq!(op.encoding(), Encoding::Ext(sub), "{}", op.name());
        }
        assert!(Opcode::from_ext(0x12).is_none());
    }

    #[test]
    fn cost_keys_drop_type_prefix() {
        assert_eq!(Opcode::I32Add.cost_key(), "add");
        assert_eq!(Opcode::I64Const.cost_key(), "const");
        assert_eq!(Opcode::F64Const.cost_key(), "const");
        assert_eq!(Opcode::BrIf.cost_key(), "br_if");
        assert_eq!(Opcode::GetLocal.cost_key(), "get_local");
        assert_eq!(Opcode::I32TruncSatF32S.cost_key(), "trunc_sat_f32_s");
    }

    #[test]
    fn branching_set_is_exact() {
        let branching = [
            Opcode::Loop,
            Opcode::End,
            Opcode::If,
            Opcode::Else,
            Opcode::Br,
            Opcode::BrTable,
            Opcode::BrIf,
            Opcode::Call,
            Opcode::CallIndirect,
            Opcode::Return,
        ];
        for op in branching {
            assert!(op.is_branching(), "{}", op.name());
        }
        // `block` starts a block but control cannot leave through it.
        assert!(!Opcode::Block.is_branching());
        assert!(!Opcode::Unreachable.is_branching());
        assert!(!Opcode::Nop.is_branching());
    }

    #[test]
    fn immediate_rules_match_wire_grammar() {
        assert_eq!(Opcode::Call.immediate_rule(), ImmediateRule::FuncIdx);
        assert_eq!(Opcode::GetGlobal.immediate_rule(), ImmediateRule::GlobalIdx);
        assert_eq!(Opcode::I32Load.immediate_rule(), ImmediateRule::Memory);
        assert_eq!(Opcode::BrTable.immediate_rule(), ImmediateRule::BrTable);
        assert_eq!(
            Opcode::CallIndirect.immediate_rule(),
            ImmediateRule::CallIndirect
        );
        assert_eq!(Opcode::GrowMemory.immediate_rule(), ImmediateRule::Byte);
        assert_eq!(Opcode::I32Add.immediate_rule(), ImmediateRule::None);
    }
}
