use crate::jvm::refmaps::interpreter;
use crate::jvm::refmaps::{BciIterator, ReferenceMapContext, ReferenceSlotVisitor};
use crate::jvm::InterpretError;
use crate::util::BitSet;

/// Storage for the frame state at the entry of each basic block plus a
/// scratch "current" frame the interpreter mutates as it walks a block.
///
/// A frame here is just one bit per local variable and operand stack slot,
/// set when the slot holds a reference. Block frames start uninitialized and
/// become initialized by the first merge into them; merges into an
/// initialized frame intersect the reference bits and report whether
/// anything changed.
pub trait FrameEncoding {
    fn max_locals(&self) -> usize;

    fn max_stack(&self) -> usize;

    /// Whether merges may allocate. An encoding that never allocates after
    /// construction is usable during a garbage collection pause.
    fn performs_allocation(&self) -> bool;

    fn is_frame_initialized(&self, block: usize) -> bool;

    /// Load `block`'s entry frame into the current frame, returning the
    /// stack depth at block entry. Must only be called on initialized
    /// blocks.
    fn reset_at_block(&mut self, block: usize) -> usize;

    /// Merge the current frame into `target`'s entry frame. `sp` is the
    /// current stack depth for a normal control flow edge; `None` marks an
    /// exception edge, where the target sees the current locals under a
    /// one-deep stack whose single slot holds the thrown exception.
    /// Returns true iff the target frame changed.
    fn merge_into(&mut self, target: usize, sp: Option<usize>) -> bool;

    fn is_local_ref(&self, index: usize) -> bool;

    fn is_stack_ref(&self, index: usize) -> bool;

    fn update_local(&mut self, index: usize, is_ref: bool);

    fn update_stack(&mut self, index: usize, is_ref: bool);

    /// Mark every slot of the current frame as not-a-reference
    fn clear_current(&mut self);
}

/// Frame encoding packing a whole frame into one `u64` per block.
///
/// Bit layout: bit 63 flags an initialized frame, bits 58-62 hold the stack
/// depth at block entry, and bits 0-57 hold the per-slot reference bits with
/// locals first and stack slots from bit `max_locals` up. Methods fitting
/// this encoding pay no allocation at all after [`CompactFrames::new`],
/// merges included.
pub struct CompactFrames {
    frames: Vec<u64>,
    current: u64,
    max_locals: usize,
    max_stack: usize,
}

impl CompactFrames {
    /// Largest stack depth the 5-bit depth field can hold
    pub const MAX_STACK: usize = 31;

    /// Number of slot bits available below the depth field
    pub const MAX_SLOTS: usize = 58;

    const INITIALIZED: u64 = 1 << 63;
    const SP_SHIFT: u32 = 58;
    const SP_MASK: u64 = 0x1f << Self::SP_SHIFT;
    const SLOTS_MASK: u64 = (1 << Self::SP_SHIFT) - 1;

    pub fn fits(max_locals: usize, max_stack: usize) -> bool {
        max_stack <= Self::MAX_STACK && max_locals + max_stack <= Self::MAX_SLOTS
    }

    pub fn new(num_blocks: usize, max_locals: usize, max_stack: usize) -> CompactFrames {
        debug_assert!(Self::fits(max_locals, max_stack));
        CompactFrames {
            frames: vec![0; num_blocks],
            current: 0,
            max_locals,
            max_stack,
        }
    }

    fn locals_mask(&self) -> u64 {
        (1u64 << self.max_locals) - 1
    }
}

impl FrameEncoding for CompactFrames {
    fn max_locals(&self) -> usize {
        self.max_locals
    }

    fn max_stack(&self) -> usize {
        self.max_stack
    }

    fn performs_allocation(&self) -> bool {
        false
    }

    fn is_frame_initialized(&self, block: usize) -> bool {
        self.frames[block] & Self::INITIALIZED != 0
    }

    fn reset_at_block(&mut self, block: usize) -> usize {
        let word = self.frames[block];
        debug_assert!(word & Self::INITIALIZED != 0);
        self.current = word & Self::SLOTS_MASK;
        ((word & Self::SP_MASK) >> Self::SP_SHIFT) as usize
    }

    fn merge_into(&mut self, target: usize, sp: Option<usize>) -> bool {
        // An exception edge delivers the current locals under a stack of
        // depth 1 whose only slot holds the thrown exception.
        let (entry, valid) = match sp {
            Some(sp) => {
                debug_assert!(sp <= self.max_stack);
                let valid = self.locals_mask() | (((1u64 << sp) - 1) << self.max_locals);
                let entry = (self.current & valid)
                    | ((sp as u64) << Self::SP_SHIFT)
                    | Self::INITIALIZED;
                (entry, valid)
            }
            None => {
                let valid = self.locals_mask() | (1u64 << self.max_locals);
                let entry = (self.current & self.locals_mask())
                    | (1u64 << self.max_locals)
                    | (1u64 << Self::SP_SHIFT)
                    | Self::INITIALIZED;
                (entry, valid)
            }
        };

        let word = self.frames[target];
        if word & Self::INITIALIZED == 0 {
            self.frames[target] = entry;
            true
        } else {
            debug_assert_eq!(word & Self::SP_MASK, entry & Self::SP_MASK);
            // Intersect the slot bits covered by `valid`, leaving the depth
            // and initialized fields and any uncovered bits untouched
            let merged = word & (entry | !valid);
            self.frames[target] = merged;
            merged != word
        }
    }

    fn is_local_ref(&self, index: usize) -> bool {
        debug_assert!(index < self.max_locals);
        self.current & (1u64 << index) != 0
    }

    fn is_stack_ref(&self, index: usize) -> bool {
        debug_assert!(index < self.max_stack);
        self.current & (1u64 << (self.max_locals + index)) != 0
    }

    fn update_local(&mut self, index: usize, is_ref: bool) {
        debug_assert!(index < self.max_locals);
        if is_ref {
            self.current |= 1u64 << index;
        } else {
            self.current &= !(1u64 << index);
        }
    }

    fn update_stack(&mut self, index: usize, is_ref: bool) {
        debug_assert!(index < self.max_stack);
        let bit = 1u64 << (self.max_locals + index);
        if is_ref {
            self.current |= bit;
        } else {
            self.current &= !bit;
        }
    }

    fn clear_current(&mut self) {
        self.current = 0;
    }
}

struct Frame {
    locals: BitSet,
    stack: BitSet,
    sp: usize,
}

/// Frame encoding holding a pair of bitsets per block, for methods too big
/// for [`CompactFrames`]. Block frames are allocated lazily by the first
/// merge into them, so this encoding allocates and must not be driven from
/// a garbage collection pause.
pub struct StandardFrames {
    frames: Vec<Option<Frame>>,
    current_locals: BitSet,
    current_stack: BitSet,
    max_locals: usize,
    max_stack: usize,
}

impl StandardFrames {
    pub fn new(num_blocks: usize, max_locals: usize, max_stack: usize) -> StandardFrames {
        let mut frames = Vec::with_capacity(num_blocks);
        frames.resize_with(num_blocks, || None);
        StandardFrames {
            frames,
            current_locals: BitSet::new_empty(max_locals),
            current_stack: BitSet::new_empty(max_stack),
            max_locals,
            max_stack,
        }
    }
}

impl FrameEncoding for StandardFrames {
    fn max_locals(&self) -> usize {
        self.max_locals
    }

    fn max_stack(&self) -> usize {
        self.max_stack
    }

    fn performs_allocation(&self) -> bool {
        true
    }

    fn is_frame_initialized(&self, block: usize) -> bool {
        self.frames[block].is_some()
    }

    fn reset_at_block(&mut self, block: usize) -> usize {
        match &self.frames[block] {
            Some(frame) => {
                self.current_locals.copy_from(&frame.locals);
                self.current_stack.copy_from(&frame.stack);
                frame.sp
            }
            None => {
                debug_assert!(false, "reset at uninitialized block {}", block);
                self.current_locals.clear_from(0);
                self.current_stack.clear_from(0);
                0
            }
        }
    }

    fn merge_into(&mut self, target: usize, sp: Option<usize>) -> bool {
        match sp {
            Some(sp) => match &mut self.frames[target] {
                Some(frame) => {
                    debug_assert_eq!(frame.sp, sp);
                    // Stack bits at or above the frame's depth are kept
                    // clear, so stale bits in the current stack are inert
                    let locals_changed = frame.locals.intersect_with(&self.current_locals);
                    let stack_changed = frame.stack.intersect_with(&self.current_stack);
                    locals_changed | stack_changed
                }
                slot => {
                    let locals = self.current_locals.clone();
                    let mut stack = self.current_stack.clone();
                    stack.clear_from(sp);
                    *slot = Some(Frame { locals, stack, sp });
                    true
                }
            },
            None => match &mut self.frames[target] {
                Some(frame) => {
                    debug_assert_eq!(frame.sp, 1);
                    // The exception slot is a reference on every edge, so
                    // only the locals can narrow
                    frame.locals.intersect_with(&self.current_locals)
                }
                slot => {
                    let locals = self.current_locals.clone();
                    let mut stack = BitSet::new_empty(self.max_stack);
                    stack.set(0, true);
                    *slot = Some(Frame {
                        locals,
                        stack,
                        sp: 1,
                    });
                    true
                }
            },
        }
    }

    fn is_local_ref(&self, index: usize) -> bool {
        self.current_locals.get(index)
    }

    fn is_stack_ref(&self, index: usize) -> bool {
        self.current_stack.get(index)
    }

    fn update_local(&mut self, index: usize, is_ref: bool) {
        self.current_locals.set(index, is_ref);
    }

    fn update_stack(&mut self, index: usize, is_ref: bool) {
        self.current_stack.set(index, is_ref);
    }

    fn clear_current(&mut self) {
        self.current_locals.clear_from(0);
        self.current_stack.clear_from(0);
    }
}

/// Frame states for one method, in whichever encoding fits it
pub enum BlockFrames {
    Compact(CompactFrames),
    Standard(StandardFrames),
}

impl BlockFrames {
    /// Allocate frame storage for the method behind `cx` and seed it: the
    /// entry block's frame from the method signature, and the frame of
    /// every block with a stack map table entry from that entry. Seeding
    /// from the stack map table cuts down the iterations
    /// [`finalize_frames`](Self::finalize_frames) needs.
    pub fn create_frames(cx: &dyn ReferenceMapContext) -> Result<BlockFrames, InterpretError> {
        let code = &cx.method().code;
        let max_locals = code.max_locals as usize;
        let max_stack = code.max_stack as usize;
        if CompactFrames::fits(max_locals, max_stack) {
            let mut frames = CompactFrames::new(cx.num_blocks(), max_locals, max_stack);
            interpreter::seed_frames(&mut frames, cx)?;
            Ok(BlockFrames::Compact(frames))
        } else {
            Self::create_standard_frames(cx)
        }
    }

    /// Like [`create_frames`](Self::create_frames) but always using the
    /// bitset encoding, even for methods small enough to pack
    pub fn create_standard_frames(
        cx: &dyn ReferenceMapContext,
    ) -> Result<BlockFrames, InterpretError> {
        let code = &cx.method().code;
        let mut frames = StandardFrames::new(
            cx.num_blocks(),
            code.max_locals as usize,
            code.max_stack as usize,
        );
        interpreter::seed_frames(&mut frames, cx)?;
        Ok(BlockFrames::Standard(frames))
    }

    /// Whether [`finalize_frames`](Self::finalize_frames) and
    /// [`interpret_reference_slots`](Self::interpret_reference_slots) may
    /// allocate
    pub fn performs_allocation(&self) -> bool {
        match self {
            BlockFrames::Compact(frames) => frames.performs_allocation(),
            BlockFrames::Standard(frames) => frames.performs_allocation(),
        }
    }

    pub fn is_frame_initialized(&self, block: usize) -> bool {
        match self {
            BlockFrames::Compact(frames) => frames.is_frame_initialized(block),
            BlockFrames::Standard(frames) => frames.is_frame_initialized(block),
        }
    }

    /// Run the interpretation to a fixpoint so that every reachable block
    /// has its final entry frame. Returns immediately when seeding already
    /// initialized every block and nothing is left to refine.
    pub fn finalize_frames(&mut self, cx: &dyn ReferenceMapContext) -> Result<(), InterpretError> {
        match self {
            BlockFrames::Compact(frames) => interpreter::finalize_frames(frames, cx),
            BlockFrames::Standard(frames) => interpreter::finalize_frames(frames, cx),
        }
    }

    /// Report the reference slots at each bytecode index yielded by `bcis`
    /// to `visitor`. Frames must already be finalized. Indices that fall in
    /// unreachable blocks are skipped.
    pub fn interpret_reference_slots(
        &mut self,
        cx: &dyn ReferenceMapContext,
        visitor: &mut dyn ReferenceSlotVisitor,
        bcis: &mut dyn BciIterator,
    ) -> Result<(), InterpretError> {
        match self {
            BlockFrames::Compact(frames) => {
                interpreter::interpret_reference_slots(frames, cx, visitor, bcis)
            }
            BlockFrames::Standard(frames) => {
                interpreter::interpret_reference_slots(frames, cx, visitor, bcis)
            }
        }
    }

    /// Render every block's entry frame, for tests and debugging
    pub fn frames_to_strings(&mut self, cx: &dyn ReferenceMapContext) -> Vec<String> {
        match self {
            BlockFrames::Compact(frames) => interpreter::frames_to_strings(frames, cx),
            BlockFrames::Standard(frames) => interpreter::frames_to_strings(frames, cx),
        }
    }

    /// [`finalize_frames`](Self::finalize_frames), logging the method's
    /// bytecode and partial frame states at error level before propagating
    /// any failure
    pub fn finalize_frames_with_diagnostics(
        &mut self,
        cx: &dyn ReferenceMapContext,
    ) -> Result<(), InterpretError> {
        match self.finalize_frames(cx) {
            Err(err) => {
                self.log_diagnostics(cx, &err);
                Err(err)
            }
            ok => ok,
        }
    }

    /// [`interpret_reference_slots`](Self::interpret_reference_slots) with
    /// the same error-level diagnostics as
    /// [`finalize_frames_with_diagnostics`](Self::finalize_frames_with_diagnostics)
    pub fn interpret_reference_slots_with_diagnostics(
        &mut self,
        cx: &dyn ReferenceMapContext,
        visitor: &mut dyn ReferenceSlotVisitor,
        bcis: &mut dyn BciIterator,
    ) -> Result<(), InterpretError> {
        match self.interpret_reference_slots(cx, visitor, bcis) {
            Err(err) => {
                self.log_diagnostics(cx, &err);
                Err(err)
            }
            ok => ok,
        }
    }

    fn log_diagnostics(&mut self, cx: &dyn ReferenceMapContext, err: &InterpretError) {
        let method = cx.method();
        log::error!(
            "reference map interpretation of {}{:?} failed: {}",
            method.name,
            method.descriptor,
            err
        );
        log::error!("bytecode: {:02x?}", method.code.bytecode);
        for (block, frame) in self.frames_to_strings(cx).iter().enumerate() {
            log::error!("block {} @ {}: {}", block, cx.block_start(block), frame);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compact_capacity() {
        assert!(CompactFrames::fits(27, 31));
        assert!(CompactFrames::fits(58, 0));
        assert!(!CompactFrames::fits(28, 31));
        assert!(!CompactFrames::fits(0, 32));
    }

    #[test]
    fn compact_merge_narrows() {
        let mut frames = CompactFrames::new(2, 3, 2);
        frames.update_local(0, true);
        frames.update_local(2, true);
        frames.update_stack(0, true);

        // First merge initializes the target verbatim
        assert!(!frames.is_frame_initialized(1));
        assert!(frames.merge_into(1, Some(1)));
        assert!(frames.is_frame_initialized(1));

        // A second identical merge changes nothing
        assert!(!frames.merge_into(1, Some(1)));

        // Dropping local 2 on another path narrows the target
        frames.update_local(2, false);
        assert!(frames.merge_into(1, Some(1)));
        assert!(!frames.merge_into(1, Some(1)));

        let sp = frames.reset_at_block(1);
        assert_eq!(sp, 1);
        assert!(frames.is_local_ref(0));
        assert!(!frames.is_local_ref(1));
        assert!(!frames.is_local_ref(2));
        assert!(frames.is_stack_ref(0));
    }

    #[test]
    fn compact_stale_stack_bits_ignored() {
        let mut frames = CompactFrames::new(2, 1, 3);
        frames.update_local(0, true);
        // Stack bits above the merged depth must not leak into the target
        frames.update_stack(2, true);
        assert!(frames.merge_into(1, Some(1)));
        let sp = frames.reset_at_block(1);
        assert_eq!(sp, 1);
        assert!(!frames.is_stack_ref(2));
    }

    #[test]
    fn compact_exception_edge() {
        let mut frames = CompactFrames::new(2, 2, 4);
        frames.update_local(1, true);
        frames.update_stack(0, true);
        frames.update_stack(3, true);

        assert!(frames.merge_into(1, None));
        let sp = frames.reset_at_block(1);
        assert_eq!(sp, 1);
        assert!(!frames.is_local_ref(0));
        assert!(frames.is_local_ref(1));
        // Handler entry stack holds only the thrown exception
        assert!(frames.is_stack_ref(0));
        assert!(!frames.is_stack_ref(3));
    }

    #[test]
    fn standard_merge_narrows() {
        let mut frames = StandardFrames::new(2, 70, 10);
        frames.update_local(0, true);
        frames.update_local(65, true);
        frames.update_stack(1, true);

        assert!(frames.merge_into(1, Some(2)));
        assert!(!frames.merge_into(1, Some(2)));

        frames.update_local(65, false);
        assert!(frames.merge_into(1, Some(2)));

        let sp = frames.reset_at_block(1);
        assert_eq!(sp, 2);
        assert!(frames.is_local_ref(0));
        assert!(!frames.is_local_ref(65));
        assert!(frames.is_stack_ref(1));
    }

    #[test]
    fn standard_exception_edge() {
        let mut frames = StandardFrames::new(2, 3, 5);
        frames.update_local(2, true);
        frames.update_stack(0, true);
        frames.update_stack(4, true);

        assert!(frames.merge_into(1, None));
        let sp = frames.reset_at_block(1);
        assert_eq!(sp, 1);
        assert!(frames.is_local_ref(2));
        assert!(frames.is_stack_ref(0));
        assert!(!frames.is_stack_ref(4));
    }

    #[test]
    fn encodings_report_allocation() {
        assert!(!CompactFrames::new(1, 1, 1).performs_allocation());
        assert!(StandardFrames::new(1, 1, 1).performs_allocation());
    }
}
