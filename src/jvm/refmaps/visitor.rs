/// Callback notified of each reference slot in the frame state at a
/// requested bytecode index
pub trait ReferenceSlotVisitor {
    fn visit_reference_in_local(&mut self, index: usize);

    /// `parameters_popped` distinguishes the two notifications made at an
    /// invoke instruction: once with the outgoing arguments still on the
    /// stack, and once after they have been popped (they are accounted for
    /// in the callee's frame instead).
    fn visit_reference_on_stack(&mut self, index: usize, parameters_popped: bool);
}

/// Ascending sequence of bytecode indices at which reference slots should
/// be reported. One interpretation pass serves all indices that fall in the
/// same basic block, which is why the sequence must be sorted.
pub trait BciIterator {
    /// Rewind to the first index
    fn reset(&mut self);

    /// The index under the cursor, or `None` when exhausted
    fn current(&self) -> Option<usize>;

    /// Move past the current index and return the new one
    fn advance(&mut self) -> Option<usize>;
}

/// Iterator over an owned list of bytecode indices
pub struct SortedBcis {
    bcis: Vec<usize>,
    position: usize,
}

impl SortedBcis {
    pub fn new(mut bcis: Vec<usize>) -> SortedBcis {
        bcis.sort_unstable();
        bcis.dedup();
        SortedBcis { bcis, position: 0 }
    }
}

impl BciIterator for SortedBcis {
    fn reset(&mut self) {
        self.position = 0;
    }

    fn current(&self) -> Option<usize> {
        self.bcis.get(self.position).copied()
    }

    fn advance(&mut self) -> Option<usize> {
        self.position += 1;
        self.current()
    }
}
