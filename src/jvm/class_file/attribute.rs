use crate::util::Width;

/// Entry in a `Code` attribute's exception table
#[derive(Copy, Clone, Debug)]
pub struct ExceptionHandler {
    /// Start of the range watched by the handler (inclusive)
    pub start_pc: u16,

    /// End of the range watched by the handler (exclusive)
    pub end_pc: u16,

    /// First instruction of the handler itself
    pub handler_pc: u16,

    /// Class of exceptions caught, or 0 to catch everything
    pub catch_type: u16,
}

impl ExceptionHandler {
    /// Does an exception thrown at `bci` dispatch to this handler?
    pub fn is_active_at(&self, bci: usize) -> bool {
        (self.start_pc as usize) <= bci && bci < (self.end_pc as usize)
    }
}

/// `StackMapTable` attribute: verification frames at branch targets
#[derive(Debug, Default)]
pub struct StackMapTable(pub Vec<StackMapFrame>);

/// Frames in a stack map table, in their class file encodings
#[derive(Debug)]
pub enum StackMapFrame {
    /// Operand stack is empty, locals are unchanged
    Same { offset_delta: u16 },

    /// Operand stack has one entry, locals are unchanged
    SameLocalsOneStack {
        offset_delta: u16,
        stack: VerificationType,
    },

    /// Operand stack is empty, the last `chopped_k` locals are absent
    Chop { offset_delta: u16, chopped_k: u8 },

    /// Operand stack is empty, `locals` are appended to the previous locals
    Append {
        offset_delta: u16,
        locals: Vec<VerificationType>,
    },

    /// Locals and operand stack are given in full
    Full {
        offset_delta: u16,
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocalsOneStack { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    /// Bytecode index this frame applies to. The first frame's delta is an
    /// absolute offset; every later frame is offset from one past the
    /// previous frame's index.
    pub fn bci(&self, previous: Option<u16>) -> u16 {
        match previous {
            None => self.offset_delta(),
            Some(previous) => previous + 1 + self.offset_delta(),
        }
    }
}

/// Verification types, as found in stack map frames
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,

    /// Instance of the class at this constant pool index
    Object(u16),

    /// Object allocated by the `new` instruction at this offset, not yet
    /// initialized
    Uninitialized(u16),
}

impl Width for VerificationType {
    fn width(&self) -> usize {
        match self {
            VerificationType::Long | VerificationType::Double => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_bcis_accumulate() {
        let frames = [
            StackMapFrame::Same { offset_delta: 4 },
            StackMapFrame::Chop {
                offset_delta: 10,
                chopped_k: 2,
            },
        ];
        let first = frames[0].bci(None);
        assert_eq!(first, 4);
        assert_eq!(frames[1].bci(Some(first)), 15);
    }

    #[test]
    fn handler_ranges_are_half_open() {
        let handler = ExceptionHandler {
            start_pc: 2,
            end_pc: 8,
            handler_pc: 12,
            catch_type: 0,
        };
        assert!(!handler.is_active_at(1));
        assert!(handler.is_active_at(2));
        assert!(handler.is_active_at(7));
        assert!(!handler.is_active_at(8));
    }
}
