//! Pretty-printing for IR
//!
//! Provides human-readable output for debugging and instruction tracing.

use super::instr::{Instr, ResultInstr};
use super::operand::{Label, Literal, Operand, Variable};
use super::unit::IrUnit;
use std::fmt::{self, Display, Write};

/// Trait for pretty-printing IR constructs
pub trait PrettyPrint {
    /// Multi-line listing
    fn pretty_print(&self) -> String;
}

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Nil => write!(f, "nil"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Fixnum(n) => write!(f, "{}", n),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Str(s) => write!(f, "{:?}", s),
            Literal::Symbol(s) => write!(f, ":{}", s),
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Temp(id) => write!(f, "%t{}", id),
            Variable::Local { name, depth: 0, .. } => write!(f, "{}", name),
            Variable::Local { name, depth, .. } => write!(f, "{}^{}", name, depth),
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(lit) => write!(f, "{}", lit),
            Operand::Variable(var) => write!(f, "{}", var),
            Operand::Label(label) => write!(f, "{}", label),
            Operand::SelfRef => write!(f, "%self"),
            Operand::CurrentModule => write!(f, "%module"),
            Operand::Splat(inner) => write!(f, "*{}", inner),
            Operand::Array(elements) => {
                write!(f, "[")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
            Operand::Closure(unit) => write!(f, "<closure {}>", unit.name()),
        }
    }
}

impl Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Instr::Label(label) = self {
            return write!(f, "{}:", label);
        }
        if let Some(result) = self.result() {
            write!(f, "{} = ", result)?;
        }
        write!(f, "{}", self.operation())?;
        let operands = self.operands();
        if !operands.is_empty() {
            write!(f, "(")?;
            for (i, op) in operands.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", op)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl PrettyPrint for IrUnit {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "{:?} {} (arity {}, locals {}, temps {}) {{",
            self.kind(),
            self.name(),
            self.arity(),
            self.local_count(),
            self.temp_count()
        );

        let mut nested = Vec::new();
        for (pc, instr) in self.instrs().iter().enumerate() {
            match instr {
                Instr::Label(_) => {
                    let _ = writeln!(output, "  {}", instr);
                }
                _ => {
                    let _ = writeln!(output, "  {:>4}  {}", pc, instr);
                }
            }
            for op in instr.operands() {
                if let Operand::Closure(unit) = op {
                    nested.push(unit);
                }
            }
        }
        let _ = writeln!(output, "}}");

        for unit in nested {
            let _ = writeln!(output);
            output.push_str(&unit.pretty_print());
        }
        output
    }
}
