//! Gas metering for WebAssembly binaries.
//!
//! Rewrites a wasm binary so that every path through it pays for the
//! instructions it executes, priced by a caller-supplied [`CostTable`].
//! The rewrite also clamps all memories to a growth ceiling, so a metered
//! module can neither run nor allocate without bound.
//!
//! # Architecture
//!
//! - [`cost`] — prices structural values against a nested cost table with
//!   `DEFAULT` inheritance.
//! - [`memory`] — clamps declared and imported memories to a page limit.
//! - [`inject`] — the instrumentation pass: segments function bodies at
//!   branch-affecting instructions and splices a charge before each
//!   segment ends, using one of two strategies (see [`Strategy`]).
//! - [`report`] — the cost distribution gathered during a run.
//!
//! # Example
//!
//! ```no_run
//! use toll_meter::{meter, CostTable, MeterOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let wasm = std::fs::read("module.wasm")?;
//! let table: CostTable = serde_json::from_str(r#"{"code": {"code": {"DEFAULT": 1}}}"#)?;
//! let metered = meter(&wasm, &table, &MeterOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod cost;
pub mod error;
pub mod inject;
pub mod memory;
pub mod report;

use log::debug;
use toll_module::{Immediate, Module, Op, Opcode, TypeCode};

pub use cost::{CostNode, CostTable, DEFAULT_KEY};
pub use error::{MeterError, MeterResult};
pub use inject::{inject_metering, POINTS_EXHAUSTED_EXPORT, REMAINING_POINTS_EXPORT};
pub use memory::apply_memory_limit;
pub use report::CostReport;

/// Value type the Call strategy's metering import takes its argument in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeterType {
    #[default]
    I32,
    I64,
    F32,
    F64,
}

impl MeterType {
    pub fn type_code(self) -> TypeCode {
        match self {
            Self::I32 => TypeCode::I32,
            Self::I64 => TypeCode::I64,
            Self::F32 => TypeCode::F32,
            Self::F64 => TypeCode::F64,
        }
    }

    /// Constant-push of `cost` in this type.  Integer costs beyond the
    /// type's range wrap through the `as` conversion; float targets
    /// round to the nearest representable value.
    pub(crate) fn const_op(self, cost: u64) -> Op {
        match self {
            Self::I32 => Op::new(Opcode::I32Const, Immediate::Varint32(cost as i32)),
            Self::I64 => Op::new(Opcode::I64Const, Immediate::Varint64(cost as i64)),
            Self::F32 => Op::new(Opcode::F32Const, Immediate::F32((cost as f32).to_le_bytes())),
            Self::F64 => Op::new(Opcode::F64Const, Immediate::F64((cost as f64).to_le_bytes())),
        }
    }
}

/// How charges are collected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Import a host function and call it with each segment's cost.  The
    /// host observes every charge but pays a call boundary per segment.
    #[default]
    Call,
    /// Keep a points counter in an exported mutable global and decrement
    /// it inline, trapping on exhaustion.  No host calls; the host funds
    /// the counter between invocations.
    Guard,
}

/// Knobs for one metering run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterOptions {
    /// Module namespace of the Call strategy's import.
    pub module_str: String,
    /// Field name of the Call strategy's import.
    pub field_str: String,
    /// Argument type of the Call strategy's import.
    pub meter_type: MeterType,
    /// Growth ceiling applied to every memory, in 64 KiB pages.  A
    /// `memory.maximum` entry in the cost table takes precedence.
    pub maximum_memory_pages: u32,
    pub strategy: Strategy,
}

impl Default for MeterOptions {
    fn default() -> Self {
        Self {
            module_str: "metering".to_string(),
            field_str: "usegas".to_string(),
            meter_type: MeterType::I32,
            maximum_memory_pages: 200,
            strategy: Strategy::Call,
        }
    }
}

/// Meter a wasm binary: decode, clamp memories, inject charges, re-encode.
pub fn meter(wasm: &[u8], table: &CostTable, options: &MeterOptions) -> MeterResult<Vec<u8>> {
    meter_with_report(wasm, table, options).map(|(bytes, _)| bytes)
}

/// [`meter`], also returning the [`CostReport`] for the run.
pub fn meter_with_report(
    wasm: &[u8],
    table: &CostTable,
    options: &MeterOptions,
) -> MeterResult<(Vec<u8>, CostReport)> {
    let mut module = Module::decode(wasm)?;
    debug!("decoded module with {} sections", module.sections.len());

    let max_pages = table
        .get("memory")
        .and_then(|memory| memory.get("maximum"))
        .and_then(CostNode::scalar)
        .and_then(|pages| u32::try_from(pages).ok())
        .unwrap_or(options.maximum_memory_pages);
    apply_memory_limit(&mut module, max_pages);
    let report = inject_metering(&mut module, table, options)?;

    let bytes = module.encode()?;
    Ok((bytes, report))
}
