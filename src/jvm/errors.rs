/// Errors detected while abstractly interpreting bytecode
///
/// These all indicate input the interpreter refuses to analyze, either
/// because the bytecode is malformed or because it uses features (like
/// subroutines) that this analysis deliberately does not model.
#[derive(Debug, PartialEq, Eq)]
pub enum InterpretError {
    /// `jsr`, `jsr_w`, or `ret` encountered. Subroutine bytecode predates
    /// stack map tables and would require a much more complicated analysis;
    /// callers should reject or rewrite such methods instead.
    SubroutineBytecode { bci: usize, opcode: u8 },

    /// Opcode outside the standard instruction set
    UnknownOpcode { bci: usize, opcode: u8 },

    /// `tableswitch`/`lookupswitch` with inconsistent bounds or counts
    MalformedSwitch { bci: usize },

    /// Stack map frame inconsistent with the state built up from the
    /// preceding entries, like a chop of more locals than are live
    MalformedStackMap { bci: usize },

    /// Instruction stream ended in the middle of an instruction
    TruncatedCode { bci: usize },

    /// Constant pool index that is out of range or refers to an entry of the
    /// wrong tag for the instruction using it
    InvalidConstant { index: u16, bci: usize },
}

impl std::fmt::Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpretError::SubroutineBytecode { bci, opcode } => write!(
                f,
                "subroutine instruction {} at bci {} is not supported",
                crate::jvm::opcodes::name_of(*opcode),
                bci
            ),
            InterpretError::UnknownOpcode { bci, opcode } => {
                write!(f, "unknown opcode 0x{:02x} at bci {}", opcode, bci)
            }
            InterpretError::MalformedSwitch { bci } => {
                write!(f, "malformed switch instruction at bci {}", bci)
            }
            InterpretError::MalformedStackMap { bci } => {
                write!(f, "malformed stack map frame at bci {}", bci)
            }
            InterpretError::TruncatedCode { bci } => {
                write!(f, "code ends mid-instruction at bci {}", bci)
            }
            InterpretError::InvalidConstant { index, bci } => {
                write!(f, "invalid constant pool index {} at bci {}", index, bci)
            }
        }
    }
}

impl std::error::Error for InterpretError {}
