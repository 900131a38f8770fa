//! Metering injection.
//!
//! Walks every function body, accumulates the static cost of each segment
//! (a maximal run of operations ending at a branch-affecting instruction),
//! and splices a charge sequence immediately before the instruction that
//! ends the segment, so the charge lands before control can transfer.
//!
//! Two strategies share the segmentation pass and differ only in what they
//! install into the module up front and in the charge sequence they emit:
//!
//! - **Call** — imports a host metering function and charges by calling it
//!   with the segment cost.  Inserting the import shifts every defined
//!   function up one slot, so call immediates, function exports, element
//!   segments, and the start entry are renumbered in the same pass.
//! - **Guard** — appends two mutable globals (an i64 points counter the
//!   host sets after instantiation, and an i32 exhausted flag), exports
//!   both, and charges by decrementing the counter inline, trapping when
//!   it runs dry.  No index space moves.

use log::debug;
use toll_module::{
    CodeEntry, ExportEntry, ExternalKind, FuncIndex, FuncType, GlobalEntry, GlobalIndex,
    GlobalType, Immediate, ImportDescriptor, ImportEntry, Module, Op, Opcode, Section, SectionId,
    TypeCode, TypeIndex,
};

use crate::cost::{evaluate, locals_shape, signature_shape, CostNode, CostTable, Shape};
use crate::error::{MeterError, MeterResult};
use crate::report::CostReport;
use crate::{MeterOptions, Strategy};

/// Export name of the Guard strategy's points counter.
pub const REMAINING_POINTS_EXPORT: &str = "metering_remaining_points";
/// Export name of the Guard strategy's exhausted flag.
pub const POINTS_EXHAUSTED_EXPORT: &str = "metering_points_exhausted";

/// Inject metering into `module` per `options`, pricing against `table`.
///
/// On success the module's code entries are replaced with their
/// instrumented versions and the strategy's imports/globals/exports are in
/// place; the returned [`CostReport`] describes what was charged.  On error
/// the module is left untouched (the only fallible step, the Call
/// strategy's import-collision check, runs before any mutation).
pub fn inject_metering(
    module: &mut Module,
    table: &CostTable,
    options: &MeterOptions,
) -> MeterResult<CostReport> {
    let emitter = match options.strategy {
        Strategy::Call => install_call(module, options)?,
        Strategy::Guard => install_guard(module),
    };

    // Signatures are snapshotted before instrumentation so the code walk
    // can mutate entries freely.
    let func_types: Vec<TypeIndex> = match module.section(SectionId::Function) {
        Some(Section::Function(entries)) => entries.clone(),
        _ => Vec::new(),
    };
    let types: Vec<FuncType> = match module.section(SectionId::Type) {
        Some(Section::Type(entries)) => entries.clone(),
        _ => Vec::new(),
    };

    let type_table = table.get("type");
    let code_table = table.get("code");
    let locals_table = code_table.and_then(|t| t.get("locals"));
    let op_table = code_table.and_then(|t| t.get("code"));

    let mut report = CostReport::default();
    if let Some(Section::Code(entries)) = module.section_mut(SectionId::Code) {
        for (i, entry) in entries.iter_mut().enumerate() {
            let signature_cost = func_types
                .get(i)
                .and_then(|ti| types.get(ti.0 as usize))
                .map(|ty| evaluate(&signature_shape(ty), type_table, 0))
                .unwrap_or(0);
            let base = signature_cost + evaluate(&locals_shape(&entry.locals), locals_table, 0);
            instrument_entry(entry, op_table, base, &emitter, &mut report);
        }
    }
    debug!(
        "injected {} charge sequences totalling {}",
        report.charges.len(),
        report.total()
    );

    Ok(report)
}

// ── Strategy seam ────────────────────────────────────────────────────────────

/// What the selected strategy contributes to the shared instrumentation
/// pass: the charge sequence, and (Call only) the function-index shift.
enum ChargeEmitter {
    Call {
        meter_func: FuncIndex,
        meter_type: crate::MeterType,
    },
    Guard {
        remaining: GlobalIndex,
        exhausted: GlobalIndex,
    },
}

impl ChargeEmitter {
    fn charge_ops(&self, cost: u64) -> Vec<Op> {
        match self {
            Self::Call {
                meter_func,
                meter_type,
            } => vec![
                meter_type.const_op(cost),
                Op::new(Opcode::Call, Immediate::Func(*meter_func)),
            ],
            Self::Guard {
                remaining,
                exhausted,
            } => vec![
                // if remaining < cost { exhausted = 1; trap }
                Op::new(Opcode::GetGlobal, Immediate::Global(*remaining)),
                Op::new(Opcode::I64Const, Immediate::Varint64(cost as i64)),
                Op::plain(Opcode::I64LtS),
                Op::new(Opcode::If, Immediate::BlockType(TypeCode::Empty)),
                Op::new(Opcode::I32Const, Immediate::Varint32(1)),
                Op::new(Opcode::SetGlobal, Immediate::Global(*exhausted)),
                Op::plain(Opcode::Unreachable),
                Op::plain(Opcode::End),
                // remaining -= cost
                Op::new(Opcode::GetGlobal, Immediate::Global(*remaining)),
                Op::new(Opcode::I64Const, Immediate::Varint64(cost as i64)),
                Op::plain(Opcode::I64Sub),
                Op::new(Opcode::SetGlobal, Immediate::Global(*remaining)),
            ],
        }
    }
}

/// Install the Call strategy: one metering import, with every function
/// reference at or above the new import's slot shifted up by one.
fn install_call(module: &mut Module, options: &MeterOptions) -> MeterResult<ChargeEmitter> {
    // Collision check first, so a rejected module is left untouched.
    if let Some(Section::Import(entries)) = module.section(SectionId::Import) {
        if entries
            .iter()
            .any(|e| e.module == options.module_str && e.field == options.field_str)
        {
            return Err(MeterError::DuplicateMeteringImport {
                module: options.module_str.clone(),
                field: options.field_str.clone(),
            });
        }
    }

    if !module.has_section(SectionId::Type) {
        module.insert_section(Section::Type(Vec::new()));
    }
    let type_index = match module.section_mut(SectionId::Type) {
        Some(Section::Type(entries)) => {
            entries.push(FuncType {
                params: vec![options.meter_type.type_code()],
                return_type: None,
            });
            TypeIndex((entries.len() - 1) as u32)
        }
        _ => unreachable!("type section was just ensured"),
    };

    let meter_func = FuncIndex(module.import_count(ExternalKind::Function));

    if !module.has_section(SectionId::Import) {
        module.insert_section(Section::Import(Vec::new()));
    }
    if let Some(Section::Import(entries)) = module.section_mut(SectionId::Import) {
        entries.push(ImportEntry {
            module: options.module_str.clone(),
            field: options.field_str.clone(),
            descriptor: ImportDescriptor::Function(type_index),
        });
    }

    shift_function_refs(module, meter_func);
    debug!(
        "metering import {}.{} installed at function index {}",
        options.module_str, options.field_str, meter_func.0
    );

    Ok(ChargeEmitter::Call {
        meter_func,
        meter_type: options.meter_type,
    })
}

/// Renumber function references in exports, element segments, and the
/// start entry after an import insertion at `threshold`.  Call immediates
/// inside code bodies are handled by the instrumentation pass itself.
fn shift_function_refs(module: &mut Module, threshold: FuncIndex) {
    for section in &mut module.sections {
        match section {
            Section::Export(entries) => {
                for entry in entries {
                    if entry.kind == ExternalKind::Function && entry.index >= threshold.0 {
                        entry.index += 1;
                    }
                }
            }
            Section::Element(entries) => {
                for entry in entries {
                    for func in &mut entry.elements {
                        if *func >= threshold {
                            func.0 += 1;
                        }
                    }
                }
            }
            Section::Start(func) => {
                if *func >= threshold {
                    func.0 += 1;
                }
            }
            _ => {}
        }
    }
}

/// Install the Guard strategy: two exported mutable globals appended after
/// every existing global.
fn install_guard(module: &mut Module) -> ChargeEmitter {
    let base = module.import_count(ExternalKind::Global)
        + match module.section(SectionId::Global) {
            Some(Section::Global(entries)) => entries.len() as u32,
            _ => 0,
        };
    let remaining = GlobalIndex(base);
    let exhausted = GlobalIndex(base + 1);

    if !module.has_section(SectionId::Global) {
        module.insert_section(Section::Global(Vec::new()));
    }
    if let Some(Section::Global(entries)) = module.section_mut(SectionId::Global) {
        entries.push(GlobalEntry {
            ty: GlobalType {
                content_type: TypeCode::I64,
                mutable: true,
            },
            init: Op::new(Opcode::I64Const, Immediate::Varint64(0)),
        });
        entries.push(GlobalEntry {
            ty: GlobalType {
                content_type: TypeCode::I32,
                mutable: true,
            },
            init: Op::new(Opcode::I32Const, Immediate::Varint32(0)),
        });
    }

    if !module.has_section(SectionId::Export) {
        module.insert_section(Section::Export(Vec::new()));
    }
    if let Some(Section::Export(entries)) = module.section_mut(SectionId::Export) {
        entries.push(ExportEntry {
            field: REMAINING_POINTS_EXPORT.to_string(),
            kind: ExternalKind::Global,
            index: remaining.0,
        });
        entries.push(ExportEntry {
            field: POINTS_EXHAUSTED_EXPORT.to_string(),
            kind: ExternalKind::Global,
            index: exhausted.0,
        });
    }

    debug!("guard globals installed at indices {} and {}", remaining.0, exhausted.0);

    ChargeEmitter::Guard {
        remaining,
        exhausted,
    }
}

// ── Code instrumentation ─────────────────────────────────────────────────────

/// Instrument one body: segment it at branch-affecting operations and
/// splice a charge before each nonzero-cost segment's final operation.
/// `base` (signature + locals cost) is folded into the first segment.
fn instrument_entry(
    entry: &mut CodeEntry,
    op_table: Option<&CostNode>,
    base: u64,
    emitter: &ChargeEmitter,
    report: &mut CostReport,
) {
    let code = std::mem::take(&mut entry.code);
    let mut metered = Vec::with_capacity(code.len());
    let mut segment: Vec<Op> = Vec::new();
    let mut cost = base;

    for mut op in code {
        if let ChargeEmitter::Call { meter_func, .. } = emitter {
            if op.opcode == Opcode::Call {
                if let Immediate::Func(func) = &mut op.immediate {
                    if *func >= *meter_func {
                        func.0 += 1;
                    }
                }
            }
        }

        let key = op.opcode.cost_key();
        let op_cost = evaluate(&Shape::Scalar(key), op_table, 0);
        report.record_op(key, op_cost);
        cost += op_cost;

        let ends_segment = op.opcode.is_branching();
        segment.push(op);
        if ends_segment {
            flush_segment(&mut metered, &mut segment, cost, emitter, report);
            cost = 0;
        }
    }
    // A body whose tail carries no branch-affecting op still gets charged.
    if !segment.is_empty() {
        flush_segment(&mut metered, &mut segment, cost, emitter, report);
    }

    entry.code = metered;
}

fn flush_segment(
    out: &mut Vec<Op>,
    segment: &mut Vec<Op>,
    cost: u64,
    emitter: &ChargeEmitter,
    report: &mut CostReport,
) {
    match segment.pop() {
        Some(last) if cost != 0 => {
            out.append(segment);
            out.extend(emitter.charge_ops(cost));
            out.push(last);
            report.record_charge(cost);
        }
        Some(last) => {
            out.append(segment);
            out.push(last);
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MeterType;

    fn op_table(json: &str) -> CostNode {
        serde_json::from_str(json).expect("valid cost table")
    }

    fn call_emitter(index: u32) -> ChargeEmitter {
        ChargeEmitter::Call {
            meter_func: FuncIndex(index),
            meter_type: MeterType::I32,
        }
    }

    #[test]
    fn splices_charge_before_segment_end() {
        let mut entry = CodeEntry {
            locals: vec![],
            code: vec![Op::plain(Opcode::Nop), Op::plain(Opcode::End)],
        };
        let table = op_table(r#"{"DEFAULT": 1}"#);
        let mut report = CostReport::default();
        instrument_entry(&mut entry, Some(&table), 0, &call_emitter(0), &mut report);

        let ops: Vec<Opcode> = entry.code.iter().map(|op| op.opcode).collect();
        assert_eq!(
            ops,
            vec![Opcode::Nop, Opcode::I32Const, Opcode::Call, Opcode::End]
        );
        assert_eq!(entry.code[1].immediate, Immediate::Varint32(2));
        assert_eq!(report.charges, vec![2]);
    }

    #[test]
    fn zero_cost_segment_is_untouched() {
        let mut entry = CodeEntry {
            locals: vec![],
            code: vec![Op::plain(Opcode::Nop), Op::plain(Opcode::End)],
        };
        let table = op_table(r#"{"nop": 0, "end": 0}"#);
        let mut report = CostReport::default();
        instrument_entry(&mut entry, Some(&table), 0, &call_emitter(0), &mut report);

        let ops: Vec<Opcode> = entry.code.iter().map(|op| op.opcode).collect();
        assert_eq!(ops, vec![Opcode::Nop, Opcode::End]);
        assert!(report.charges.is_empty());
    }

    #[test]
    fn base_cost_lands_in_first_segment_only() {
        let mut entry = CodeEntry {
            locals: vec![],
            code: vec![
                Op::plain(Opcode::Nop),
                Op::plain(Opcode::Return),
                Op::plain(Opcode::Nop),
                Op::plain(Opcode::End),
            ],
        };
        let table = op_table(r#"{"DEFAULT": 1}"#);
        let mut report = CostReport::default();
        instrument_entry(&mut entry, Some(&table), 10, &call_emitter(0), &mut report);

        // first segment: base 10 + nop + return; second: nop + end
        assert_eq!(report.charges, vec![12, 2]);
    }

    #[test]
    fn call_immediates_at_or_above_threshold_shift() {
        let mut entry = CodeEntry {
            locals: vec![],
            code: vec![
                Op::new(Opcode::Call, Immediate::Func(FuncIndex(1))),
                Op::new(Opcode::Call, Immediate::Func(FuncIndex(2))),
                Op::plain(Opcode::End),
            ],
        };
        let mut report = CostReport::default();
        instrument_entry(&mut entry, None, 0, &call_emitter(2), &mut report);

        assert_eq!(entry.code[0].immediate, Immediate::Func(FuncIndex(1)));
        assert_eq!(entry.code[1].immediate, Immediate::Func(FuncIndex(3)));
    }

    #[test]
    fn guard_charge_sequence_shape() {
        let emitter = ChargeEmitter::Guard {
            remaining: GlobalIndex(3),
            exhausted: GlobalIndex(4),
        };
        let ops = emitter.charge_ops(99);
        let opcodes: Vec<Opcode> = ops.iter().map(|op| op.opcode).collect();
        assert_eq!(
            opcodes,
            vec![
                Opcode::GetGlobal,
                Opcode::I64Const,
                Opcode::I64LtS,
                Opcode::If,
                Opcode::I32Const,
                Opcode::SetGlobal,
                Opcode::Unreachable,
                Opcode::End,
                Opcode::GetGlobal,
                Opcode::I64Const,
                Opcode::I64Sub,
                Opcode::SetGlobal,
            ]
        );
        assert_eq!(ops[1].immediate, Immediate::Varint64(99));
        assert_eq!(ops[5].immediate, Immediate::Global(GlobalIndex(4)));
    }
}
