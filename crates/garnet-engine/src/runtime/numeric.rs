//! Numeric kernels
//!
//! Shared by the core `Integer`/`Float` methods and by specialized binary
//! nodes, so the fast path and the generic path compute identical results.
//! Integers are 64-bit; overflow is reported, never wrapped.

use super::value::Value;
use crate::error::HostError;

/// Binary operators with a numeric fast path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
}

impl BinaryOp {
    /// Every operator
    pub const ALL: [BinaryOp; 10] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Mod,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::Eq,
    ];

    /// Method name the operator dispatches to
    pub fn selector(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
        }
    }

    /// Operator for a method name
    pub fn from_selector(selector: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.selector() == selector)
    }

    /// Integer kernel
    #[inline]
    pub fn fixnum(&self, a: i64, b: i64) -> Result<Value, HostError> {
        let value = match self {
            BinaryOp::Add => Value::Fixnum(a.checked_add(b).ok_or(HostError::IntegerOverflow)?),
            BinaryOp::Sub => Value::Fixnum(a.checked_sub(b).ok_or(HostError::IntegerOverflow)?),
            BinaryOp::Mul => Value::Fixnum(a.checked_mul(b).ok_or(HostError::IntegerOverflow)?),
            BinaryOp::Div => Value::Fixnum(floor_div(a, b)?),
            BinaryOp::Mod => Value::Fixnum(floor_mod(a, b)?),
            BinaryOp::Lt => Value::Bool(a < b),
            BinaryOp::Le => Value::Bool(a <= b),
            BinaryOp::Gt => Value::Bool(a > b),
            BinaryOp::Ge => Value::Bool(a >= b),
            BinaryOp::Eq => Value::Bool(a == b),
        };
        Ok(value)
    }

    /// Float kernel
    #[inline]
    pub fn float(&self, a: f64, b: f64) -> Value {
        match self {
            BinaryOp::Add => Value::Float(a + b),
            BinaryOp::Sub => Value::Float(a - b),
            BinaryOp::Mul => Value::Float(a * b),
            BinaryOp::Div => Value::Float(a / b),
            BinaryOp::Mod => Value::Float(float_mod(a, b)),
            BinaryOp::Lt => Value::Bool(a < b),
            BinaryOp::Le => Value::Bool(a <= b),
            BinaryOp::Gt => Value::Bool(a > b),
            BinaryOp::Ge => Value::Bool(a >= b),
            BinaryOp::Eq => Value::Bool(a == b),
        }
    }

    /// Mixed-representation arithmetic used by the generic core methods.
    /// `None` means the operands are not both numeric.
    pub fn numeric(&self, left: &Value, right: &Value) -> Option<Result<Value, HostError>> {
        match (left, right) {
            (Value::Fixnum(a), Value::Fixnum(b)) => Some(self.fixnum(*a, *b)),
            (Value::Float(a), Value::Float(b)) => Some(Ok(self.float(*a, *b))),
            (Value::Fixnum(a), Value::Float(b)) => Some(Ok(self.float(*a as f64, *b))),
            (Value::Float(a), Value::Fixnum(b)) => Some(Ok(self.float(*a, *b as f64))),
            _ => None,
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.selector())
    }
}

/// Division rounding toward negative infinity
pub fn floor_div(a: i64, b: i64) -> Result<i64, HostError> {
    if b == 0 {
        return Err(HostError::ZeroDivision);
    }
    let q = a.checked_div(b).ok_or(HostError::IntegerOverflow)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Modulo whose sign follows the divisor
pub fn floor_mod(a: i64, b: i64) -> Result<i64, HostError> {
    if b == 0 {
        return Err(HostError::ZeroDivision);
    }
    let r = a.checked_rem(b).ok_or(HostError::IntegerOverflow)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_division() {
        assert_eq!(floor_div(7, 2).unwrap(), 3);
        assert_eq!(floor_div(-7, 2).unwrap(), -4);
        assert_eq!(floor_div(7, -2).unwrap(), -4);
        assert_eq!(floor_div(-7, -2).unwrap(), 3);
        assert_eq!(floor_div(1, 0), Err(HostError::ZeroDivision));
        assert_eq!(floor_div(i64::MIN, -1), Err(HostError::IntegerOverflow));
    }

    #[test]
    fn test_floor_modulo() {
        assert_eq!(floor_mod(7, 3).unwrap(), 1);
        assert_eq!(floor_mod(-7, 3).unwrap(), 2);
        assert_eq!(floor_mod(7, -3).unwrap(), -2);
        assert_eq!(floor_mod(5, 0), Err(HostError::ZeroDivision));
    }

    #[test]
    fn test_overflow_is_reported() {
        assert_eq!(
            BinaryOp::Add.fixnum(i64::MAX, 1),
            Err(HostError::IntegerOverflow)
        );
        assert_eq!(
            BinaryOp::Mul.fixnum(i64::MAX, 2),
            Err(HostError::IntegerOverflow)
        );
    }

    #[test]
    fn test_mixed_arithmetic() {
        let sum = BinaryOp::Add
            .numeric(&Value::Fixnum(1), &Value::Float(0.5))
            .unwrap()
            .unwrap();
        assert_eq!(sum, Value::Float(1.5));
        assert!(BinaryOp::Add
            .numeric(&Value::Fixnum(1), &Value::string("x"))
            .is_none());
    }

    #[test]
    fn test_selector_lookup() {
        for op in BinaryOp::ALL {
            assert_eq!(BinaryOp::from_selector(op.selector()), Some(op));
        }
        assert_eq!(BinaryOp::from_selector("<=>"), None);
    }
}
