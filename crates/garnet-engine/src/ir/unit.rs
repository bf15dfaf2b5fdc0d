//! IR units
//!
//! A unit is one method, closure or script body: a linear instruction
//! vector plus the tables the interpreter needs. Construction resolves every
//! label to a program counter and computes the rescue pc of each
//! instruction from the exception regions enclosing it.

use super::instr::{Instr, ResultInstr};
use super::operand::{Label, Operand, Variable};
use crate::error::EngineError;
use crate::interpreter::ExecutionProfile;
use crate::runtime::Arity;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// What a unit's body belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Method body
    Method,
    /// Block body
    Closure,
    /// Top-level code
    Script,
}

impl UnitKind {
    /// Numeric code stored in persisted IR
    pub fn code(&self) -> u8 {
        match self {
            UnitKind::Method => 0,
            UnitKind::Closure => 1,
            UnitKind::Script => 2,
        }
    }

    /// Inverse of `code`
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(UnitKind::Method),
            1 => Some(UnitKind::Closure),
            2 => Some(UnitKind::Script),
            _ => None,
        }
    }
}

/// Validated instruction list with its label table and profile
pub struct IrUnit {
    name: Arc<str>,
    kind: UnitKind,
    arity: Arity,
    local_count: u32,
    temp_count: u32,
    instrs: Vec<Instr>,
    label_pcs: FxHashMap<Label, usize>,
    rescue_pcs: Vec<Option<usize>>,
    profile: ExecutionProfile,
}

impl IrUnit {
    /// Build and validate a unit
    ///
    /// Fails on duplicate labels, jumps to labels that do not exist and
    /// unbalanced exception regions.
    pub fn new(
        name: &str,
        kind: UnitKind,
        arity: Arity,
        local_count: u32,
        instrs: Vec<Instr>,
    ) -> Result<Self, EngineError> {
        let mut label_pcs = FxHashMap::default();
        for (pc, instr) in instrs.iter().enumerate() {
            if let Instr::Label(label) = instr {
                if label_pcs.insert(*label, pc).is_some() {
                    return Err(EngineError::MalformedIr(format!(
                        "{}: label {} defined twice",
                        name, label
                    )));
                }
            }
        }
        for instr in &instrs {
            for target in instr.jump_targets() {
                if !label_pcs.contains_key(&target) {
                    return Err(EngineError::UnknownLabel(target.0));
                }
            }
        }

        let rescue_pcs = rescue_table(name, &instrs, &label_pcs)?;
        let temp_count = instrs.iter().map(max_temp).max().unwrap_or(0);

        Ok(Self {
            name: Arc::from(name),
            kind,
            arity,
            local_count,
            temp_count,
            instrs,
            label_pcs,
            rescue_pcs,
            profile: ExecutionProfile::new(),
        })
    }

    /// Unit name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unit kind
    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Accepted argument counts
    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Instructions in order
    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Number of temporary slots an activation needs
    pub fn temp_count(&self) -> u32 {
        self.temp_count
    }

    /// Number of depth-0 local slots
    pub fn local_count(&self) -> u32 {
        self.local_count
    }

    /// Index of the instruction that places `label`
    pub fn label_pc(&self, label: Label) -> Result<usize, EngineError> {
        self.label_pcs
            .get(&label)
            .copied()
            .ok_or(EngineError::UnknownLabel(label.0))
    }

    /// Where a raise at `pc` resumes, if `pc` is inside an exception region
    pub fn rescue_pc(&self, pc: usize) -> Option<usize> {
        self.rescue_pcs.get(pc).copied().flatten()
    }

    /// Call and loop counters
    pub fn profile(&self) -> &ExecutionProfile {
        &self.profile
    }

    /// Highest label id in use, plus one
    pub fn label_count(&self) -> u32 {
        self.label_pcs.keys().map(|l| l.0 + 1).max().unwrap_or(0)
    }

    /// Rebuild with new instructions, keeping the unit's metadata
    pub fn with_instrs(&self, instrs: Vec<Instr>) -> Result<Self, EngineError> {
        IrUnit::new(&self.name, self.kind, self.arity, self.local_count, instrs)
    }
}

/// Innermost enclosing region's rescue pc for every instruction
fn rescue_table(
    name: &str,
    instrs: &[Instr],
    label_pcs: &FxHashMap<Label, usize>,
) -> Result<Vec<Option<usize>>, EngineError> {
    let mut regions: Vec<usize> = Vec::new();
    let mut table = Vec::with_capacity(instrs.len());
    for instr in instrs {
        match instr {
            Instr::ExceptionRegionStart { rescue } => {
                let pc = label_pcs
                    .get(rescue)
                    .copied()
                    .ok_or(EngineError::UnknownLabel(rescue.0))?;
                table.push(regions.last().copied());
                regions.push(pc);
            }
            Instr::ExceptionRegionEnd => {
                if regions.pop().is_none() {
                    return Err(EngineError::MalformedIr(format!(
                        "{}: exception region closed without being opened",
                        name
                    )));
                }
                table.push(regions.last().copied());
            }
            _ => table.push(regions.last().copied()),
        }
    }
    if !regions.is_empty() {
        return Err(EngineError::MalformedIr(format!(
            "{}: {} exception region(s) left open",
            name,
            regions.len()
        )));
    }
    Ok(table)
}

fn max_temp(instr: &Instr) -> u32 {
    let from_result = match instr.result() {
        Some(Variable::Temp(id)) => id + 1,
        _ => 0,
    };
    instr
        .operands()
        .iter()
        .map(operand_max_temp)
        .fold(from_result, u32::max)
}

fn operand_max_temp(op: &Operand) -> u32 {
    match op {
        Operand::Variable(Variable::Temp(id)) => id + 1,
        Operand::Splat(inner) => operand_max_temp(inner),
        Operand::Array(elements) => elements.iter().map(operand_max_temp).max().unwrap_or(0),
        _ => 0,
    }
}

impl PartialEq for IrUnit {
    /// Structural: same shape and instructions, profiles ignored
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.arity == other.arity
            && self.local_count == other.local_count
            && self.instrs == other.instrs
    }
}

impl std::fmt::Debug for IrUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrUnit")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("arity", &self.arity)
            .field("instrs", &self.instrs.len())
            .finish()
    }
}
