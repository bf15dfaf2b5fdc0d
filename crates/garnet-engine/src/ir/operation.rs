//! Operation tags
//!
//! Every instruction reports an `Operation`; the tag's numeric code is what
//! persisted IR stores, and its `OpClass` groups operations the way the
//! interpreter and optimizer care about.

/// Coarse grouping of operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// Method or block invocation
    Call,
    /// Conditional or unconditional transfer
    Branch,
    /// Leaves the unit (return, break, next, raise)
    Return,
    /// Labels, region markers, argument receipt, polls
    BookKeeping,
    /// defined?-family queries and `$!` accessors
    Defined,
    /// Everything else
    Other,
}

macro_rules! operations {
    ($( $variant:ident = $code:literal => $name:literal, $class:ident; )*) => {
        /// Instruction tag
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Operation {
            $(
                #[allow(missing_docs)]
                $variant = $code,
            )*
        }

        impl Operation {
            /// Every operation, in code order
            pub const ALL: &'static [Operation] = &[$(Operation::$variant,)*];

            /// Mnemonic used by the pretty-printer
            pub fn name(&self) -> &'static str {
                match self {
                    $(Operation::$variant => $name,)*
                }
            }

            /// Broad class of the operation
            pub fn op_class(&self) -> OpClass {
                match self {
                    $(Operation::$variant => OpClass::$class,)*
                }
            }

            /// Numeric code stored in persisted IR
            pub fn code(&self) -> u8 {
                *self as u8
            }

            /// Inverse of `code`
            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(Operation::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

operations! {
    Copy = 0 => "copy", Other;
    Label = 1 => "label", BookKeeping;
    Jump = 2 => "jump", Branch;
    BTrue = 3 => "b_true", Branch;
    BFalse = 4 => "b_false", Branch;
    BNil = 5 => "b_nil", Branch;
    BEq = 6 => "b_eq", Branch;
    Call = 7 => "call", Call;
    AttrAssign = 8 => "attr_assign", Call;
    Yield = 9 => "yield", Call;
    ReceiveSelf = 10 => "recv_self", BookKeeping;
    ReceiveArg = 11 => "recv_arg", BookKeeping;
    ReceiveOptArg = 12 => "recv_opt_arg", BookKeeping;
    ReceiveRestArg = 13 => "recv_rest_arg", BookKeeping;
    ReceiveBlock = 14 => "recv_block", BookKeeping;
    BlockGiven = 15 => "block_given", Other;
    Return = 16 => "return", Return;
    NonlocalReturn = 17 => "nonlocal_return", Return;
    Break = 18 => "break", Return;
    Next = 19 => "next", Return;
    CheckForLocalJump = 20 => "check_local_jump", BookKeeping;
    ThreadPoll = 21 => "thread_poll", BookKeeping;
    GetGlobal = 22 => "get_global", Other;
    PutGlobal = 23 => "put_global", Other;
    GetField = 24 => "get_field", Other;
    PutField = 25 => "put_field", Other;
    GetClassVar = 26 => "get_cvar", Other;
    PutClassVar = 27 => "put_cvar", Other;
    SearchConst = 28 => "search_const", Other;
    InheritanceSearchConst = 29 => "inherit_search_const", Other;
    PutConst = 30 => "put_const", Other;
    DefineMethod = 31 => "def_method", Other;
    ExceptionRegionStart = 32 => "region_start", BookKeeping;
    ExceptionRegionEnd = 33 => "region_end", BookKeeping;
    ReceiveException = 34 => "recv_exception", BookKeeping;
    ThrowException = 35 => "throw", Return;
    GlobalIsDefined = 36 => "global_defined", Defined;
    HasInstanceVar = 37 => "has_ivar", Defined;
    ClassVarIsDefined = 38 => "cvar_defined", Defined;
    IsMethodBound = 39 => "method_bound", Defined;
    MethodIsPublic = 40 => "method_public", Defined;
    SuperMethodBound = 41 => "super_bound", Defined;
    BackrefIsMatchData = 42 => "backref_is_match", Defined;
    GetErrorInfo = 43 => "get_error_info", Defined;
    RestoreErrorInfo = 44 => "restore_error_info", Defined;
}

impl Operation {
    /// Conditional jump
    pub fn is_branch(&self) -> bool {
        self.op_class() == OpClass::Branch
    }

    /// Method call
    pub fn is_call(&self) -> bool {
        self.op_class() == OpClass::Call
    }

    /// Operations after which control never falls through
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Operation::Jump
                | Operation::Return
                | Operation::NonlocalReturn
                | Operation::Break
                | Operation::Next
                | Operation::ThrowException
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_code(op.code()), Some(*op));
        }
        assert_eq!(Operation::from_code(250), None);
    }

    #[test]
    fn test_codes_are_dense() {
        for (i, op) in Operation::ALL.iter().enumerate() {
            assert_eq!(op.code() as usize, i);
        }
    }

    #[test]
    fn test_classes() {
        assert_eq!(Operation::Call.op_class(), OpClass::Call);
        assert_eq!(Operation::HasInstanceVar.op_class(), OpClass::Defined);
        assert!(Operation::BNil.is_branch());
        assert!(Operation::Jump.ends_flow());
        assert!(!Operation::Copy.ends_flow());
    }
}
