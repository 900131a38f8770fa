//! Structured WebAssembly module model and binary codec.
//!
//! # Architecture
//!
//! - [`module`] — the section-oriented module representation: a [`Module`]
//!   is an ordered list of typed [`Section`]s, with per-space index
//!   newtypes for cross-references.
//! - [`opcode`] — the fixed opcode, type, and immediate tables shared by
//!   both codec directions.
//! - [`decode`] / [`encode`] — binary ⇄ structure.  Round-trips are
//!   byte-identical: section lengths are always recomputed from
//!   re-serialized content.
//!
//! The codec is strict in both directions: unknown bytes and
//! declared-vs-actual length mismatches fail decoding with
//! [`CodecError::MalformedBinary`], and structural shapes the fixed tables
//! cannot serialize fail encoding with [`CodecError::UnsupportedStructure`].

pub mod decode;
pub mod encode;
pub mod error;
pub mod module;
pub mod opcode;

pub use error::{CodecError, CodecResult};
pub use module::{
    CodeEntry, CustomSection, DataEntry, ElementEntry, ExportEntry, ExternalKind, FuncIndex,
    FuncType, GlobalEntry, GlobalIndex, GlobalType, ImportDescriptor, ImportEntry, LocalEntry,
    Module, ResizableLimits, Section, SectionId, TableType, TypeIndex,
};
pub use opcode::{Immediate, Op, Opcode, TypeCode};

impl Module {
    /// Decode a wasm binary into its structured form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Module> {
        decode::decode_module(bytes)
    }

    /// Re-encode this module to the binary format.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        encode::encode_module(self)
    }
}
