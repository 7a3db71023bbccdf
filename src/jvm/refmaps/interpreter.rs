use byteorder::{BigEndian, ByteOrder};

use crate::jvm::class_file::{ConstantTag, StackMapFrame, VerificationType};
use crate::jvm::opcodes::*;
use crate::jvm::refmaps::{
    BciIterator, FrameEncoding, ReferenceMapContext, ReferenceSlotVisitor,
};
use crate::jvm::InterpretError;
use crate::util::Width;

/// Builds the initial frame states before the fixpoint runs: the entry
/// block's frame from the method signature and one frame per stack map
/// table entry.
///
/// Tracks which local slots are the second half of a long or double so that
/// chop frames, which count a two-slot local as one entry, shrink the
/// active locals by the right amount.
struct FramesInit<'a, F: FrameEncoding> {
    frames: &'a mut F,
    cx: &'a dyn ReferenceMapContext,
    sp: usize,
    active_locals: usize,
    is_second_double_word: Vec<bool>,
    frame_bci: usize,
}

impl<'a, F: FrameEncoding> FramesInit<'a, F> {
    fn new(frames: &'a mut F, cx: &'a dyn ReferenceMapContext) -> FramesInit<'a, F> {
        let max_locals = frames.max_locals();
        frames.clear_current();
        FramesInit {
            frames,
            cx,
            sp: 0,
            active_locals: 0,
            is_second_double_word: vec![false; max_locals],
            frame_bci: 0,
        }
    }

    /// Clear the slots outside the active window, which merges would
    /// otherwise pick up from whatever frame was materialized last
    fn adjust_current_frame(&mut self) {
        for slot in self.sp..self.frames.max_stack() {
            self.frames.update_stack(slot, false);
        }
        for local in self.active_locals..self.frames.max_locals() {
            self.frames.update_local(local, false);
        }
    }

    fn is_ref(&self, ty: &VerificationType) -> Result<bool, InterpretError> {
        let method = self.cx.method();
        Ok(match ty {
            VerificationType::Null => true,
            VerificationType::UninitializedThis => !method.holder_is_word,
            VerificationType::Object(index) => {
                let class = self.cx.constant_pool().class_at(*index).ok_or(
                    InterpretError::InvalidConstant {
                        index: *index,
                        bci: self.frame_bci,
                    },
                )?;
                class.kind.is_reference()
            }
            VerificationType::Uninitialized(new_bci) => {
                // The slot holds the product of the `new` instruction at
                // this offset; its class operand decides the kind
                let new_bci = *new_bci as usize;
                let code = &method.code.bytecode;
                let operand = code.get(new_bci + 1..new_bci + 3).ok_or(
                    InterpretError::TruncatedCode { bci: new_bci },
                )?;
                let index = BigEndian::read_u16(operand);
                let class = self.cx.constant_pool().class_at(index).ok_or(
                    InterpretError::InvalidConstant {
                        index,
                        bci: new_bci,
                    },
                )?;
                class.kind.is_reference()
            }
            _ => false,
        })
    }

    fn push(&mut self, ty: &VerificationType) -> Result<(), InterpretError> {
        if ty.width() == 2 {
            self.frames.update_stack(self.sp, false);
            self.frames.update_stack(self.sp + 1, false);
            self.sp += 2;
        } else {
            let is_ref = self.is_ref(ty)?;
            self.frames.update_stack(self.sp, is_ref);
            self.sp += 1;
        }
        Ok(())
    }

    fn store(&mut self, ty: &VerificationType, index: usize) -> Result<(), InterpretError> {
        if ty.width() == 2 {
            self.frames.update_local(index, false);
            self.frames.update_local(index + 1, false);
            self.is_second_double_word[index] = false;
            self.is_second_double_word[index + 1] = true;
            self.active_locals = self.active_locals.max(index + 2);
        } else {
            let is_ref = self.is_ref(ty)?;
            self.frames.update_local(index, is_ref);
            self.is_second_double_word[index] = false;
            self.active_locals = self.active_locals.max(index + 1);
        }
        Ok(())
    }

    fn append(&mut self, ty: &VerificationType) -> Result<(), InterpretError> {
        let at = self.active_locals;
        self.store(ty, at)
    }

    fn chop_locals(&mut self, count: usize) -> Result<(), InterpretError> {
        for _ in 0..count {
            if self.active_locals == 0 {
                return Err(InterpretError::MalformedStackMap {
                    bci: self.frame_bci,
                });
            }
            if self.is_second_double_word[self.active_locals - 1] {
                self.is_second_double_word[self.active_locals - 1] = false;
                self.active_locals -= 2;
            } else {
                self.active_locals -= 1;
            }
        }
        self.adjust_current_frame();
        Ok(())
    }

    fn clear_stack(&mut self) {
        self.sp = 0;
        self.adjust_current_frame();
    }

    fn clear(&mut self) {
        self.sp = 0;
        self.active_locals = 0;
        self.is_second_double_word.fill(false);
        self.adjust_current_frame();
    }

    /// Merge the current frame into the block starting at `bci`, if any.
    /// Stack map entries at indices inside a block carry no information the
    /// interpreter can use and are skipped.
    fn merge_at(&mut self, bci: usize) {
        let block = self.cx.block_index_of(bci);
        if bci == self.cx.block_start(block) {
            self.frames.merge_into(block, Some(self.sp));
        }
    }
}

/// Seed the entry block's frame from the method signature and every stack
/// map table entry's frame into its block.
pub(crate) fn seed_frames<F: FrameEncoding>(
    frames: &mut F,
    cx: &dyn ReferenceMapContext,
) -> Result<(), InterpretError> {
    let method = cx.method();
    let mut init = FramesInit::new(frames, cx);

    if !method.is_static() {
        // The receiver slot is a word, not a reference, for methods on
        // word-typed classes
        init.frames.update_local(0, !method.holder_is_word);
        init.active_locals = 1;
    }
    for kind in &method.parameter_kinds {
        let at = init.active_locals;
        if kind.is_reference() {
            init.frames.update_local(at, true);
        }
        if kind.stack_slots() == 2 {
            init.is_second_double_word[at + 1] = true;
        }
        init.active_locals += kind.stack_slots();
    }
    init.frames.merge_into(0, Some(0));

    let mut previous: Option<u16> = None;
    for frame in &method.code.stack_map_table.0 {
        let bci = frame.bci(previous);
        init.frame_bci = bci as usize;
        match frame {
            StackMapFrame::Same { .. } => {
                init.clear_stack();
            }
            StackMapFrame::SameLocalsOneStack { stack, .. } => {
                init.clear_stack();
                init.push(stack)?;
            }
            StackMapFrame::Chop { chopped_k, .. } => {
                init.chop_locals(*chopped_k as usize)?;
                init.clear_stack();
            }
            StackMapFrame::Append { locals, .. } => {
                init.clear_stack();
                for ty in locals {
                    init.append(ty)?;
                }
            }
            StackMapFrame::Full { locals, stack, .. } => {
                init.clear();
                for ty in locals {
                    init.append(ty)?;
                }
                for ty in stack {
                    init.push(ty)?;
                }
            }
        }
        init.merge_at(bci as usize);
        previous = Some(bci);
    }

    Ok(())
}

/// Iterate interpretation over all initialized blocks until no block's
/// entry frame changes. When seeding already initialized every block, the
/// loop is skipped entirely.
pub(crate) fn finalize_frames<F: FrameEncoding>(
    frames: &mut F,
    cx: &dyn ReferenceMapContext,
) -> Result<(), InterpretError> {
    let num_blocks = cx.num_blocks();
    let mut changed = (0..num_blocks).any(|block| !frames.is_frame_initialized(block));
    while changed {
        changed = false;
        for block in 0..num_blocks {
            if frames.is_frame_initialized(block) {
                let mut interpreter = Interpreter::new(frames, cx);
                changed |= interpreter.interpret_block(block, None)?;
            }
        }
    }
    Ok(())
}

/// Re-run single blocks to report the reference slots at each index yielded
/// by `bcis`. Indices in uninitialized (unreachable) blocks are skipped.
pub(crate) fn interpret_reference_slots<F: FrameEncoding>(
    frames: &mut F,
    cx: &dyn ReferenceMapContext,
    visitor: &mut dyn ReferenceSlotVisitor,
    bcis: &mut dyn BciIterator,
) -> Result<(), InterpretError> {
    bcis.reset();
    while let Some(bci) = bcis.current() {
        let block = cx.block_index_of(bci);
        if !frames.is_frame_initialized(block) {
            bcis.advance();
            continue;
        }
        let mut interpreter = Interpreter::new(frames, cx);
        let mut query = Query {
            visitor: &mut *visitor,
            bcis: &mut *bcis,
        };
        interpreter.interpret_block(block, Some(&mut query))?;
        // An index that is not an instruction start never matches inside
        // its block; step over it rather than loop forever
        if bcis.current() == Some(bci) {
            bcis.advance();
        }
    }
    Ok(())
}

/// Render every block's entry frame
pub(crate) fn frames_to_strings<F: FrameEncoding>(
    frames: &mut F,
    cx: &dyn ReferenceMapContext,
) -> Vec<String> {
    (0..cx.num_blocks())
        .map(|block| {
            if !frames.is_frame_initialized(block) {
                return String::from("<uninitialized>");
            }
            let sp = frames.reset_at_block(block);
            current_frame_to_string(frames, sp)
        })
        .collect()
}

fn current_frame_to_string<F: FrameEncoding>(frames: &F, sp: usize) -> String {
    use std::fmt::Write;

    let mut rendered = String::new();
    let _ = write!(rendered, "locals[{}] = {{ ", frames.max_locals());
    for i in 0..frames.max_locals() {
        if frames.is_local_ref(i) {
            let _ = write!(rendered, "{} ", i);
        }
    }
    let _ = write!(rendered, "}}, stack[{}] = {{ ", sp);
    for i in 0..sp {
        if frames.is_stack_ref(i) {
            let _ = write!(rendered, "{} ", i);
        }
    }
    rendered.push('}');
    rendered
}

/// Visitor and index stream for a query pass. Absent during the fixpoint.
struct Query<'q> {
    visitor: &'q mut dyn ReferenceSlotVisitor,
    bcis: &'q mut dyn BciIterator,
}

struct Interpreter<'a, F: FrameEncoding> {
    frames: &'a mut F,
    cx: &'a dyn ReferenceMapContext,
    code: &'a [u8],
    bci: usize,
    sp: usize,
}

impl<'a, F: FrameEncoding> Interpreter<'a, F> {
    fn new(frames: &'a mut F, cx: &'a dyn ReferenceMapContext) -> Interpreter<'a, F> {
        let code = method_code(cx);
        Interpreter {
            frames,
            cx,
            code,
            bci: 0,
            sp: 0,
        }
    }

    fn read_u8(&mut self) -> Result<u8, InterpretError> {
        let byte = self
            .code
            .get(self.bci)
            .copied()
            .ok_or(InterpretError::TruncatedCode { bci: self.bci })?;
        self.bci += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, InterpretError> {
        let bytes = self
            .code
            .get(self.bci..self.bci + 2)
            .ok_or(InterpretError::TruncatedCode { bci: self.bci })?;
        self.bci += 2;
        Ok(BigEndian::read_u16(bytes))
    }

    fn read_i16(&mut self) -> Result<i16, InterpretError> {
        let bytes = self
            .code
            .get(self.bci..self.bci + 2)
            .ok_or(InterpretError::TruncatedCode { bci: self.bci })?;
        self.bci += 2;
        Ok(BigEndian::read_i16(bytes))
    }

    fn read_i32(&mut self) -> Result<i32, InterpretError> {
        let bytes = self
            .code
            .get(self.bci..self.bci + 4)
            .ok_or(InterpretError::TruncatedCode { bci: self.bci })?;
        self.bci += 4;
        Ok(BigEndian::read_i32(bytes))
    }

    fn skip(&mut self, count: usize) -> Result<(), InterpretError> {
        if self.bci + count > self.code.len() {
            return Err(InterpretError::TruncatedCode { bci: self.bci });
        }
        self.bci += count;
        Ok(())
    }

    /// Advance past the padding that aligns switch operands to a 4-byte
    /// boundary from the start of the code array
    fn align_bci(&mut self) {
        let remainder = self.bci % 4;
        if remainder != 0 {
            self.bci += 4 - remainder;
        }
    }

    fn push_ref(&mut self) {
        debug_assert!(self.sp < self.frames.max_stack());
        self.frames.update_stack(self.sp, true);
        self.sp += 1;
    }

    fn push_cat1(&mut self) {
        self.push_cat1_is(false);
    }

    fn push_cat1_is(&mut self, is_ref: bool) {
        debug_assert!(self.sp < self.frames.max_stack());
        self.frames.update_stack(self.sp, is_ref);
        self.sp += 1;
    }

    fn push_cat2(&mut self) {
        self.push_cat1_is(false);
        self.push_cat1_is(false);
    }

    fn push_kind(&mut self, kind: crate::jvm::Kind) {
        if kind.is_reference() {
            self.push_ref();
        } else {
            match kind.stack_slots() {
                0 => {}
                2 => self.push_cat2(),
                _ => self.push_cat1(),
            }
        }
    }

    fn pop_cat1(&mut self) -> bool {
        debug_assert!(self.sp > 0);
        self.sp -= 1;
        self.frames.is_stack_ref(self.sp)
    }

    fn pop_cat2(&mut self) {
        debug_assert!(self.sp > 1);
        self.sp -= 2;
    }

    fn pop_kind(&mut self, kind: crate::jvm::Kind) {
        if kind.is_category1() {
            self.pop_cat1();
        } else {
            self.pop_cat2();
        }
    }

    /// `aload`: the pushed slot is a reference exactly when the local is
    fn load_and_push(&mut self, index: usize) {
        let is_ref = self.frames.is_local_ref(index);
        self.push_cat1_is(is_ref);
    }

    /// `astore`: on word-typed methods the popped slot may be a word
    fn pop_and_store(&mut self, index: usize) {
        let is_ref = self.pop_cat1();
        self.frames.update_local(index, is_ref);
    }

    fn pop_and_store_cat1(&mut self, index: usize) {
        self.pop_cat1();
        self.frames.update_local(index, false);
    }

    fn pop_and_store_cat2(&mut self, index: usize) {
        self.pop_cat2();
        self.frames.update_local(index, false);
        self.frames.update_local(index + 1, false);
    }

    fn merge(&mut self, target_block: usize) -> bool {
        self.frames.merge_into(target_block, Some(self.sp))
    }

    fn merge_two(&mut self, target_block1: usize, target_block2: usize) -> bool {
        // No short circuit: both merges must run
        self.merge(target_block1) | self.merge(target_block2)
    }

    fn merge_exception_handlers(&mut self, bci: usize) -> bool {
        let cx = self.cx;
        let mut changed = false;
        for handler in cx.exception_handlers() {
            if handler.is_active_at(bci) {
                let block = cx.block_index_of(handler.handler_pc as usize);
                changed |= self.frames.merge_into(block, None);
            }
        }
        changed
    }

    fn target_block(&self, opcode_bci: usize, offset: i32) -> usize {
        let target = (opcode_bci as i64 + offset as i64) as usize;
        self.cx.block_index_of(target)
    }

    fn visit_referenced_slots(&self, visitor: &mut dyn ReferenceSlotVisitor, parameters_popped: bool) {
        if !parameters_popped {
            for i in 0..self.frames.max_locals() {
                if self.frames.is_local_ref(i) {
                    visitor.visit_reference_in_local(i);
                }
            }
        }
        for i in 0..self.sp {
            if self.frames.is_stack_ref(i) {
                visitor.visit_reference_on_stack(i, parameters_popped);
            }
        }
    }

    /// Interpret one basic block from its entry frame, merging the outgoing
    /// state into every control flow successor (including active exception
    /// handlers at each instruction). Returns true iff any successor's entry
    /// frame changed.
    ///
    /// When `query` is given, the visitor is notified of the reference slots
    /// at each of the iterator's indices falling inside the block, and the
    /// pass returns early (reporting no change) once the iterator moves past
    /// the block.
    fn interpret_block(
        &mut self,
        block: usize,
        mut query: Option<&mut Query<'_>>,
    ) -> Result<bool, InterpretError> {
        let cx = self.cx;
        self.sp = self.frames.reset_at_block(block);
        self.bci = cx.block_start(block);
        let end_bci = cx.block_start(block + 1);
        let mut changed = false;

        let mut search_bci = match &query {
            Some(q) => q.bcis.current(),
            None => None,
        };

        log::trace!(
            "interpreting block {} at bci {}, sp={}, search bci={:?}",
            block,
            self.bci,
            self.sp,
            search_bci
        );

        while self.bci != end_bci {
            let opcode_bci = self.bci;
            changed |= self.merge_exception_handlers(opcode_bci);

            let at_search = Some(opcode_bci) == search_bci;
            let opcode = self.read_u8()?;

            if at_search {
                if let Some(q) = query.as_mut() {
                    // Report before invoke arguments are popped; this frame
                    // still owns them at this point
                    self.visit_referenced_slots(&mut *q.visitor, false);
                }
            }

            log::trace!(
                "  {} {}: {}",
                current_frame_to_string(self.frames, self.sp),
                opcode_bci,
                name_of(opcode)
            );

            match opcode {
                NOP => {}
                ACONST_NULL => self.push_ref(),
                ICONST_M1 | ICONST_0 | ICONST_1 | ICONST_2 | ICONST_3 | ICONST_4 | ICONST_5
                | FCONST_0 | FCONST_1 | FCONST_2 => self.push_cat1(),
                LCONST_0 | LCONST_1 | DCONST_0 | DCONST_1 => self.push_cat2(),
                BIPUSH => {
                    self.skip(1)?;
                    self.push_cat1();
                }
                SIPUSH => {
                    self.skip(2)?;
                    self.push_cat1();
                }
                LDC | LDC_W => {
                    let index = if opcode == LDC {
                        self.read_u8()? as u16
                    } else {
                        self.read_u16()?
                    };
                    match cx.constant_pool().tag_at(index) {
                        Some(ConstantTag::Integer) | Some(ConstantTag::Float) => self.push_cat1(),
                        Some(ConstantTag::String)
                        | Some(ConstantTag::Class)
                        | Some(ConstantTag::MethodHandle)
                        | Some(ConstantTag::MethodType) => self.push_ref(),
                        _ => {
                            return Err(InterpretError::InvalidConstant {
                                index,
                                bci: opcode_bci,
                            })
                        }
                    }
                }
                LDC2_W => {
                    self.skip(2)?;
                    self.push_cat2();
                }
                ILOAD | FLOAD => {
                    self.skip(1)?;
                    self.push_cat1();
                }
                LLOAD | DLOAD => {
                    self.skip(1)?;
                    self.push_cat2();
                }
                ALOAD => {
                    let index = self.read_u8()? as usize;
                    self.load_and_push(index);
                }
                ILOAD_0 | ILOAD_1 | ILOAD_2 | ILOAD_3 | FLOAD_0 | FLOAD_1 | FLOAD_2 | FLOAD_3 => {
                    self.push_cat1()
                }
                LLOAD_0 | LLOAD_1 | LLOAD_2 | LLOAD_3 | DLOAD_0 | DLOAD_1 | DLOAD_2 | DLOAD_3 => {
                    self.push_cat2()
                }
                ALOAD_0 | ALOAD_1 | ALOAD_2 | ALOAD_3 => {
                    self.load_and_push((opcode - ALOAD_0) as usize)
                }
                IALOAD | BALOAD | CALOAD | SALOAD | FALOAD => {
                    self.pop_cat1();
                    self.pop_cat1();
                    self.push_cat1();
                }
                LALOAD | DALOAD => {
                    self.pop_cat1();
                    self.pop_cat1();
                    self.push_cat2();
                }
                AALOAD => {
                    self.pop_cat1();
                    self.pop_cat1();
                    self.push_ref();
                }
                ISTORE | FSTORE => {
                    let index = self.read_u8()? as usize;
                    self.pop_and_store_cat1(index);
                }
                LSTORE | DSTORE => {
                    let index = self.read_u8()? as usize;
                    self.pop_and_store_cat2(index);
                }
                ASTORE => {
                    let index = self.read_u8()? as usize;
                    self.pop_and_store(index);
                }
                ISTORE_0 | ISTORE_1 | ISTORE_2 | ISTORE_3 => {
                    self.pop_and_store_cat1((opcode - ISTORE_0) as usize)
                }
                FSTORE_0 | FSTORE_1 | FSTORE_2 | FSTORE_3 => {
                    self.pop_and_store_cat1((opcode - FSTORE_0) as usize)
                }
                LSTORE_0 | LSTORE_1 | LSTORE_2 | LSTORE_3 => {
                    self.pop_and_store_cat2((opcode - LSTORE_0) as usize)
                }
                DSTORE_0 | DSTORE_1 | DSTORE_2 | DSTORE_3 => {
                    self.pop_and_store_cat2((opcode - DSTORE_0) as usize)
                }
                ASTORE_0 | ASTORE_1 | ASTORE_2 | ASTORE_3 => {
                    self.pop_and_store((opcode - ASTORE_0) as usize)
                }
                IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => {
                    self.pop_cat1();
                    self.pop_cat1();
                    self.pop_cat1();
                }
                LASTORE | DASTORE => {
                    self.pop_cat2();
                    self.pop_cat1();
                    self.pop_cat1();
                }
                POP => {
                    self.pop_cat1();
                }
                POP2 => self.pop_cat2(),
                DUP => {
                    let top = self.frames.is_stack_ref(self.sp - 1);
                    self.push_cat1_is(top);
                }
                DUP_X1 => {
                    let value1 = self.pop_cat1();
                    let value2 = self.pop_cat1();
                    self.push_cat1_is(value1);
                    self.push_cat1_is(value2);
                    self.push_cat1_is(value1);
                }
                DUP_X2 => {
                    let value1 = self.pop_cat1();
                    let value2 = self.pop_cat1();
                    let value3 = self.pop_cat1();
                    self.push_cat1_is(value1);
                    self.push_cat1_is(value3);
                    self.push_cat1_is(value2);
                    self.push_cat1_is(value1);
                }
                DUP2 => {
                    let value1 = self.pop_cat1();
                    let value2 = self.pop_cat1();
                    self.push_cat1_is(value2);
                    self.push_cat1_is(value1);
                    self.push_cat1_is(value2);
                    self.push_cat1_is(value1);
                }
                DUP2_X1 => {
                    let value1 = self.pop_cat1();
                    let value2 = self.pop_cat1();
                    let value3 = self.pop_cat1();
                    self.push_cat1_is(value2);
                    self.push_cat1_is(value1);
                    self.push_cat1_is(value3);
                    self.push_cat1_is(value2);
                    self.push_cat1_is(value1);
                }
                DUP2_X2 => {
                    let value1 = self.pop_cat1();
                    let value2 = self.pop_cat1();
                    let value3 = self.pop_cat1();
                    let value4 = self.pop_cat1();
                    self.push_cat1_is(value2);
                    self.push_cat1_is(value1);
                    self.push_cat1_is(value4);
                    self.push_cat1_is(value3);
                    self.push_cat1_is(value2);
                    self.push_cat1_is(value1);
                }
                SWAP => {
                    let value1 = self.pop_cat1();
                    let value2 = self.pop_cat1();
                    self.push_cat1_is(value1);
                    self.push_cat1_is(value2);
                }
                // Category-1 binary ops, and long shifts whose shift count
                // is a single int slot
                IADD | FADD | ISUB | FSUB | IMUL | FMUL | IDIV | FDIV | IREM | FREM | ISHL
                | LSHL | ISHR | LSHR | IUSHR | LUSHR | IAND | IOR | IXOR | FCMPL | FCMPG => {
                    self.pop_cat1();
                }
                LADD | DADD | LSUB | DSUB | LMUL | DMUL | LDIV | DDIV | LREM | DREM | LAND
                | LOR | LXOR => self.pop_cat2(),
                // Same-width unary ops leave the frame untouched
                INEG | LNEG | FNEG | DNEG | I2F | L2D | F2I | D2L | I2B | I2C | I2S => {}
                IINC => self.skip(2)?,
                I2L | I2D | F2L | F2D => {
                    self.pop_cat1();
                    self.push_cat2();
                }
                L2I | L2F | D2I | D2F => {
                    self.pop_cat2();
                    self.push_cat1();
                }
                LCMP | DCMPL | DCMPG => {
                    self.pop_cat2();
                    self.pop_cat2();
                    self.push_cat1();
                }
                IFNULL | IFNONNULL | IFEQ | IFNE | IFLT | IFGE | IFGT | IFLE => {
                    self.pop_cat1();
                    let offset = self.read_i16()? as i32;
                    if at_search {
                        if let Some(q) = query.as_mut() {
                            q.bcis.advance();
                        }
                    }
                    let target = self.target_block(opcode_bci, offset);
                    return Ok(self.merge_two(target, block + 1) | changed);
                }
                IF_ICMPEQ | IF_ICMPNE | IF_ICMPLT | IF_ICMPGE | IF_ICMPGT | IF_ICMPLE
                | IF_ACMPEQ | IF_ACMPNE => {
                    self.pop_cat1();
                    self.pop_cat1();
                    let offset = self.read_i16()? as i32;
                    if at_search {
                        if let Some(q) = query.as_mut() {
                            q.bcis.advance();
                        }
                    }
                    let target = self.target_block(opcode_bci, offset);
                    return Ok(self.merge_two(target, block + 1) | changed);
                }
                GOTO => {
                    let offset = self.read_i16()? as i32;
                    if at_search {
                        if let Some(q) = query.as_mut() {
                            q.bcis.advance();
                        }
                    }
                    let target = self.target_block(opcode_bci, offset);
                    return Ok(self.merge(target) | changed);
                }
                GOTO_W => {
                    let offset = self.read_i32()?;
                    if at_search {
                        if let Some(q) = query.as_mut() {
                            q.bcis.advance();
                        }
                    }
                    let target = self.target_block(opcode_bci, offset);
                    return Ok(self.merge(target) | changed);
                }
                JSR | JSR_W | RET => {
                    return Err(InterpretError::SubroutineBytecode {
                        bci: opcode_bci,
                        opcode,
                    })
                }
                TABLESWITCH => {
                    self.pop_cat1();
                    self.align_bci();
                    let default_offset = self.read_i32()?;
                    let low = self.read_i32()?;
                    let high = self.read_i32()?;
                    if high < low {
                        return Err(InterpretError::MalformedSwitch { bci: opcode_bci });
                    }
                    let cases = (high as i64 - low as i64 + 1) as usize;
                    let default_target = self.target_block(opcode_bci, default_offset);
                    changed |= self.merge(default_target);
                    for _ in 0..cases {
                        let offset = self.read_i32()?;
                        let target = self.target_block(opcode_bci, offset);
                        changed |= self.merge(target);
                    }
                    if at_search {
                        if let Some(q) = query.as_mut() {
                            q.bcis.advance();
                        }
                    }
                    return Ok(changed);
                }
                LOOKUPSWITCH => {
                    self.pop_cat1();
                    self.align_bci();
                    let default_offset = self.read_i32()?;
                    let pairs = self.read_i32()?;
                    if pairs < 0 {
                        return Err(InterpretError::MalformedSwitch { bci: opcode_bci });
                    }
                    let default_target = self.target_block(opcode_bci, default_offset);
                    changed |= self.merge(default_target);
                    for _ in 0..pairs {
                        self.read_i32()?; // match value
                        let offset = self.read_i32()?;
                        let target = self.target_block(opcode_bci, offset);
                        changed |= self.merge(target);
                    }
                    if at_search {
                        if let Some(q) = query.as_mut() {
                            q.bcis.advance();
                        }
                    }
                    return Ok(changed);
                }
                IRETURN | FRETURN | ARETURN => {
                    self.pop_cat1();
                    if at_search {
                        if let Some(q) = query.as_mut() {
                            q.bcis.advance();
                        }
                    }
                    return Ok(changed);
                }
                LRETURN | DRETURN => {
                    self.pop_cat2();
                    if at_search {
                        if let Some(q) = query.as_mut() {
                            q.bcis.advance();
                        }
                    }
                    return Ok(changed);
                }
                RETURN => {
                    if at_search {
                        if let Some(q) = query.as_mut() {
                            q.bcis.advance();
                        }
                    }
                    return Ok(changed);
                }
                GETSTATIC => {
                    let index = self.read_u16()?;
                    let field = cx.constant_pool().field_at(index).ok_or(
                        InterpretError::InvalidConstant {
                            index,
                            bci: opcode_bci,
                        },
                    )?;
                    self.push_kind(field.kind);
                }
                PUTSTATIC => {
                    let index = self.read_u16()?;
                    let field = cx.constant_pool().field_at(index).ok_or(
                        InterpretError::InvalidConstant {
                            index,
                            bci: opcode_bci,
                        },
                    )?;
                    self.pop_kind(field.kind);
                }
                GETFIELD => {
                    self.pop_cat1(); // receiver
                    let index = self.read_u16()?;
                    let field = cx.constant_pool().field_at(index).ok_or(
                        InterpretError::InvalidConstant {
                            index,
                            bci: opcode_bci,
                        },
                    )?;
                    self.push_kind(field.kind);
                }
                PUTFIELD => {
                    let index = self.read_u16()?;
                    let field = cx.constant_pool().field_at(index).ok_or(
                        InterpretError::InvalidConstant {
                            index,
                            bci: opcode_bci,
                        },
                    )?;
                    self.pop_kind(field.kind);
                    self.pop_cat1(); // receiver
                }
                INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE
                | INVOKEDYNAMIC => {
                    let index = self.read_u16()?;
                    if opcode == INVOKEINTERFACE || opcode == INVOKEDYNAMIC {
                        // count+0 for invokeinterface, two zero bytes for
                        // invokedynamic
                        self.skip(2)?;
                    }
                    let signature = cx.constant_pool().signature_at(index).ok_or(
                        InterpretError::InvalidConstant {
                            index,
                            bci: opcode_bci,
                        },
                    )?;
                    for kind in signature.parameter_kinds.iter().rev() {
                        self.pop_kind(*kind);
                    }
                    if opcode != INVOKESTATIC && opcode != INVOKEDYNAMIC {
                        self.pop_cat1(); // receiver
                    }
                    if at_search {
                        if let Some(q) = query.as_mut() {
                            // Report again after the arguments are popped:
                            // they are accounted for in the callee's frame,
                            // possibly under different slot kinds
                            self.visit_referenced_slots(&mut *q.visitor, true);
                        }
                    }
                    self.push_kind(signature.result_kind);
                }
                NEW => {
                    let index = self.read_u16()?;
                    let class = cx.constant_pool().class_at(index).ok_or(
                        InterpretError::InvalidConstant {
                            index,
                            bci: opcode_bci,
                        },
                    )?;
                    self.push_kind(class.kind);
                }
                NEWARRAY => {
                    self.skip(1)?;
                    self.pop_cat1();
                    self.push_ref();
                }
                ANEWARRAY => {
                    self.skip(2)?;
                    self.pop_cat1();
                    self.push_ref();
                }
                ARRAYLENGTH => {
                    self.pop_cat1();
                    self.push_cat1();
                }
                ATHROW => {
                    self.pop_cat1();
                    if at_search {
                        if let Some(q) = query.as_mut() {
                            q.bcis.advance();
                        }
                    }
                    return Ok(changed);
                }
                CHECKCAST => {
                    self.pop_cat1();
                    let index = self.read_u16()?;
                    let class = cx.constant_pool().class_at(index).ok_or(
                        InterpretError::InvalidConstant {
                            index,
                            bci: opcode_bci,
                        },
                    )?;
                    self.push_kind(class.kind);
                }
                INSTANCEOF => {
                    self.skip(2)?;
                    self.pop_cat1();
                    self.push_cat1();
                }
                MONITORENTER | MONITOREXIT => {
                    self.pop_cat1();
                }
                WIDE => {
                    let widened = self.read_u8()?;
                    let index = self.read_u16()? as usize;
                    match widened {
                        ILOAD | FLOAD => self.push_cat1(),
                        LLOAD | DLOAD => self.push_cat2(),
                        ALOAD => self.load_and_push(index),
                        ISTORE | FSTORE => self.pop_and_store_cat1(index),
                        LSTORE | DSTORE => self.pop_and_store_cat2(index),
                        ASTORE => self.pop_and_store(index),
                        IINC => self.skip(2)?,
                        RET => {
                            return Err(InterpretError::SubroutineBytecode {
                                bci: opcode_bci,
                                opcode: widened,
                            })
                        }
                        _ => {
                            return Err(InterpretError::UnknownOpcode {
                                bci: opcode_bci,
                                opcode: widened,
                            })
                        }
                    }
                }
                MULTIANEWARRAY => {
                    self.skip(2)?;
                    let dimensions = self.read_u8()?;
                    for _ in 0..dimensions {
                        self.pop_cat1();
                    }
                    self.push_ref();
                }
                _ => {
                    return Err(InterpretError::UnknownOpcode {
                        bci: opcode_bci,
                        opcode,
                    })
                }
            }

            if at_search {
                if let Some(q) = query.as_mut() {
                    search_bci = q.bcis.advance();
                    match search_bci {
                        None => return Ok(false),
                        Some(next) if next >= end_bci => return Ok(false),
                        _ => {}
                    }
                }
            }
        }

        // Verified bytecode can only run off the block's end by falling
        // through to the next block
        Ok(self.merge(block + 1) | changed)
    }
}

fn method_code(cx: &dyn ReferenceMapContext) -> &[u8] {
    &cx.method().code.bytecode
}
