//! Constant propagation
//!
//! Temporaries assigned a literal (or `self`) are replaced by that operand in
//! later reads. The map is reset at every label: a label may be a loop head,
//! and a back-edge can reassign a temporary. Locals are never tracked since
//! closures may write them. Branches on a now-literal condition are folded.

use super::instr::{BranchKind, Instr, ResultInstr};
use super::operand::{Operand, ValueMap, Variable};
use super::unit::IrUnit;
use crate::error::EngineError;
use log::debug;

/// Run constant propagation over a unit, producing a new unit
pub fn propagate_constants(unit: &IrUnit) -> Result<IrUnit, EngineError> {
    let mut map = ValueMap::default();
    let mut out = Vec::with_capacity(unit.instrs().len());
    let mut replaced = 0usize;

    for instr in unit.instrs() {
        let mut instr = instr.clone();
        if matches!(instr, Instr::Label(_)) {
            map.clear();
        }
        if instr.simplify_operands(&map, false) {
            replaced += 1;
        }

        if let Some(result) = instr.result().cloned() {
            map.remove(&result);
            if let (Variable::Temp(_), Instr::Copy { value, .. }) = (&result, &instr) {
                if value.is_constant() || matches!(value, Operand::SelfRef) {
                    map.insert(result, value.clone());
                }
            }
        }

        match fold_branch(instr) {
            Some(folded) => out.push(folded),
            None => continue,
        }
    }

    debug!("{}: constant propagation rewrote {} instruction(s)", unit.name(), replaced);
    unit.with_instrs(out)
}

/// A branch on a literal becomes a jump or disappears
fn fold_branch(instr: Instr) -> Option<Instr> {
    let Instr::Branch {
        kind,
        value: Operand::Literal(lit),
        target,
    } = &instr
    else {
        return Some(instr);
    };
    let v = lit.to_value();
    let taken = match kind {
        BranchKind::True => v.is_truthy(),
        BranchKind::False => !v.is_truthy(),
        BranchKind::Nil => v.is_nil(),
    };
    if taken {
        Some(Instr::Jump(*target))
    } else {
        None
    }
}
