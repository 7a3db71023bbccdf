use refmaps::jvm::class_file::{
    Code, ConstantsPool, ExceptionHandler, Method, StackMapFrame, StackMapTable, VerificationType,
};
use refmaps::jvm::opcodes::*;
use refmaps::jvm::refmaps::{
    BlockFrames, MethodContext, ReferenceSlotVisitor, SortedBcis,
};
use refmaps::jvm::{InterpretError, MethodAccessFlags, NoWordTypes};

#[derive(Default, Debug, PartialEq, Eq)]
struct CollectingVisitor {
    locals: Vec<usize>,
    stack: Vec<(usize, bool)>,
}

impl ReferenceSlotVisitor for CollectingVisitor {
    fn visit_reference_in_local(&mut self, index: usize) {
        self.locals.push(index);
    }

    fn visit_reference_on_stack(&mut self, index: usize, parameters_popped: bool) {
        self.stack.push((index, parameters_popped));
    }
}

fn static_method(
    descriptor: &str,
    max_stack: u16,
    max_locals: u16,
    bytecode: Vec<u8>,
    exception_table: Vec<ExceptionHandler>,
    stack_map_table: StackMapTable,
) -> Method {
    Method::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "pkg/Test",
        "test",
        descriptor,
        Code {
            max_stack,
            max_locals,
            bytecode,
            exception_table,
            stack_map_table,
        },
        &NoWordTypes,
    )
    .unwrap()
}

fn query_at(frames: &mut BlockFrames, cx: &MethodContext, bcis: Vec<usize>) -> CollectingVisitor {
    let mut visitor = CollectingVisitor::default();
    let mut bcis = SortedBcis::new(bcis);
    frames
        .interpret_reference_slots(cx, &mut visitor, &mut bcis)
        .unwrap();
    visitor
}

#[test]
fn identity_method() {
    let _ = env_logger::builder().is_test(true).try_init();

    let method = static_method(
        "(Ljava/lang/Object;)Ljava/lang/Object;",
        1,
        1,
        vec![ALOAD_0, ARETURN],
        vec![],
        StackMapTable::default(),
    );
    let pool = ConstantsPool::new();
    let cx = MethodContext::new(&method, &pool, vec![0]);

    let mut frames = BlockFrames::create_frames(&cx).unwrap();
    assert!(!frames.performs_allocation());
    frames.finalize_frames(&cx).unwrap();

    // Before the load only the parameter is a reference
    let at_load = query_at(&mut frames, &cx, vec![0]);
    assert_eq!(at_load.locals, vec![0]);
    assert_eq!(at_load.stack, vec![]);

    // At the return the reference also sits on the stack
    let at_return = query_at(&mut frames, &cx, vec![1]);
    assert_eq!(at_return.locals, vec![0]);
    assert_eq!(at_return.stack, vec![(0, false)]);
}

/// Bytecode for a two-armed branch storing a null on one path and an int on
/// the other into local 1, merging at the final return:
///
/// ```text
///  0: iload_0
///  1: ifeq 9
///  4: aconst_null
///  5: astore_1
///  6: goto 11
///  9: iconst_1
/// 10: istore_1
/// 11: return
/// ```
fn branch_merge_bytecode() -> Vec<u8> {
    vec![
        ILOAD_0, IFEQ, 0x00, 0x08, ACONST_NULL, ASTORE_1, GOTO, 0x00, 0x05, ICONST_1, ISTORE_1,
        RETURN,
    ]
}

const BRANCH_MERGE_BLOCKS: [usize; 4] = [0, 4, 9, 11];

#[test]
fn branch_merge_narrows_local() {
    let method = static_method(
        "(Z)V",
        1,
        2,
        branch_merge_bytecode(),
        vec![],
        StackMapTable::default(),
    );
    let pool = ConstantsPool::new();
    let cx = MethodContext::new(&method, &pool, BRANCH_MERGE_BLOCKS.to_vec());

    let mut frames = BlockFrames::create_frames(&cx).unwrap();
    frames.finalize_frames(&cx).unwrap();

    // On the null path local 1 holds a reference...
    let at_goto = query_at(&mut frames, &cx, vec![6]);
    assert_eq!(at_goto.locals, vec![1]);

    // ...but at the merge it might be an int, so it must not be reported
    let at_merge = query_at(&mut frames, &cx, vec![11]);
    assert_eq!(at_merge.locals, vec![]);
    assert_eq!(at_merge.stack, vec![]);

    // Mid-store on the null path: the null is still on the stack
    let at_store = query_at(&mut frames, &cx, vec![5]);
    assert_eq!(at_store.locals, vec![]);
    assert_eq!(at_store.stack, vec![(0, false)]);
}

#[test]
fn stack_map_table_seeds_branch_targets() {
    let stack_map_table = StackMapTable(vec![
        StackMapFrame::Same { offset_delta: 9 },
        StackMapFrame::Append {
            offset_delta: 1,
            locals: vec![VerificationType::Top],
        },
    ]);
    let method = static_method(
        "(Z)V",
        1,
        2,
        branch_merge_bytecode(),
        vec![],
        stack_map_table,
    );
    let pool = ConstantsPool::new();
    let cx = MethodContext::new(&method, &pool, BRANCH_MERGE_BLOCKS.to_vec());

    let frames = BlockFrames::create_frames(&cx).unwrap();

    // Entry and both stack map frames are seeded; the fallthrough block at
    // bci 4 has no table entry and stays uninitialized until finalization
    assert!(frames.is_frame_initialized(0));
    assert!(!frames.is_frame_initialized(1));
    assert!(frames.is_frame_initialized(2));
    assert!(frames.is_frame_initialized(3));

    let mut frames = frames;
    frames.finalize_frames(&cx).unwrap();
    assert!(frames.is_frame_initialized(1));

    let at_merge = query_at(&mut frames, &cx, vec![11]);
    assert_eq!(at_merge.locals, vec![]);
}

#[test]
fn compact_and_standard_encodings_agree() {
    let method = static_method(
        "(Z)V",
        1,
        2,
        branch_merge_bytecode(),
        vec![],
        StackMapTable::default(),
    );
    let pool = ConstantsPool::new();
    let cx = MethodContext::new(&method, &pool, BRANCH_MERGE_BLOCKS.to_vec());

    let mut compact = BlockFrames::create_frames(&cx).unwrap();
    let mut standard = BlockFrames::create_standard_frames(&cx).unwrap();
    assert!(!compact.performs_allocation());
    assert!(standard.performs_allocation());

    compact.finalize_frames(&cx).unwrap();
    standard.finalize_frames(&cx).unwrap();

    assert_eq!(
        compact.frames_to_strings(&cx),
        standard.frames_to_strings(&cx)
    );

    for bci in [0, 4, 5, 6, 9, 11] {
        assert_eq!(
            query_at(&mut compact, &cx, vec![bci]),
            query_at(&mut standard, &cx, vec![bci]),
            "encodings disagree at bci {}",
            bci
        );
    }
}

#[test]
fn exception_handler_entry_frame() {
    // A try range juggling three ints, with a catch-all handler:
    //
    //  0: iconst_0   4: pop     8: pop (handler, pops the exception)
    //  1: iconst_1   5: pop     9: iconst_1
    //  2: iconst_2   6: iconst_0   10: ireturn
    //  3: pop        7: ireturn
    let method = static_method(
        "(Ljava/lang/Object;)I",
        3,
        1,
        vec![
            ICONST_0, ICONST_1, ICONST_2, POP, POP, POP, ICONST_0, IRETURN, POP, ICONST_1, IRETURN,
        ],
        vec![ExceptionHandler {
            start_pc: 0,
            end_pc: 6,
            handler_pc: 8,
            catch_type: 0,
        }],
        StackMapTable::default(),
    );
    let pool = ConstantsPool::new();
    let cx = MethodContext::new(&method, &pool, vec![0, 8]);

    let mut frames = BlockFrames::create_frames(&cx).unwrap();
    frames.finalize_frames(&cx).unwrap();

    // However deep the operand stack was at the throwing instruction, the
    // handler starts with just the thrown exception on it
    assert_eq!(
        frames.frames_to_strings(&cx)[1],
        "locals[1] = { 0 }, stack[1] = { 0 }"
    );

    let at_handler = query_at(&mut frames, &cx, vec![8]);
    assert_eq!(at_handler.locals, vec![0]);
    assert_eq!(at_handler.stack, vec![(0, false)]);
}

#[test]
fn invoke_reports_stack_before_and_after_popping_arguments() {
    let mut pool = ConstantsPool::new();
    let helper = pool
        .add_method_ref(
            "pkg/Test",
            "helper",
            "(Ljava/lang/Object;)Ljava/lang/Object;",
            &NoWordTypes,
        )
        .unwrap();
    let [index_high, index_low] = helper.to_be_bytes();

    //  0: aload_0
    //  1: aload_0
    //  2: invokestatic helper
    //  5: pop
    //  6: pop
    //  7: return
    let method = static_method(
        "(Ljava/lang/Object;)V",
        2,
        1,
        vec![
            ALOAD_0,
            ALOAD_0,
            INVOKESTATIC,
            index_high,
            index_low,
            POP,
            POP,
            RETURN,
        ],
        vec![],
        StackMapTable::default(),
    );
    let cx = MethodContext::new(&method, &pool, vec![0]);

    let mut frames = BlockFrames::create_frames(&cx).unwrap();
    frames.finalize_frames(&cx).unwrap();

    let at_invoke = query_at(&mut frames, &cx, vec![2]);
    assert_eq!(at_invoke.locals, vec![0]);
    // Both copies reported with the argument still on the stack, then only
    // the copy below it once the argument belongs to the callee
    assert_eq!(at_invoke.stack, vec![(0, false), (1, false), (0, true)]);
}

#[test]
fn tableswitch_merges_all_targets() {
    //  0: iload_0
    //  1: tableswitch, low 0, high 0, default 22, case 0 -> 20
    // 20: aload_1     22: aload_1
    // 21: areturn     23: areturn
    let mut bytecode = vec![ILOAD_0, TABLESWITCH, 0x00, 0x00];
    for operand in [21i32, 0, 0, 19] {
        bytecode.extend_from_slice(&operand.to_be_bytes());
    }
    bytecode.extend_from_slice(&[ALOAD_1, ARETURN, ALOAD_1, ARETURN]);

    let method = static_method(
        "(ILjava/lang/Object;)Ljava/lang/Object;",
        1,
        2,
        bytecode,
        vec![],
        StackMapTable::default(),
    );
    let pool = ConstantsPool::new();
    let cx = MethodContext::new(&method, &pool, vec![0, 20, 22]);

    let mut frames = BlockFrames::create_frames(&cx).unwrap();
    frames.finalize_frames(&cx).unwrap();

    assert!(frames.is_frame_initialized(1));
    assert!(frames.is_frame_initialized(2));
    for block in [1, 2] {
        assert_eq!(
            frames.frames_to_strings(&cx)[block],
            "locals[2] = { 1 }, stack[0] = { }"
        );
    }

    let at_case = query_at(&mut frames, &cx, vec![21]);
    assert_eq!(at_case.locals, vec![1]);
    assert_eq!(at_case.stack, vec![(0, false)]);
}

#[test]
fn wide_load_and_store_track_references() {
    //  0: aload_0
    //  1: wide astore 260
    //  5: wide aload 260
    //  9: areturn
    let method = static_method(
        "(Ljava/lang/Object;)Ljava/lang/Object;",
        1,
        300,
        vec![
            ALOAD_0, WIDE, ASTORE, 0x01, 0x04, WIDE, ALOAD, 0x01, 0x04, ARETURN,
        ],
        vec![],
        StackMapTable::default(),
    );
    let pool = ConstantsPool::new();
    let cx = MethodContext::new(&method, &pool, vec![0]);

    // 300 locals forces the bitset encoding
    let mut frames = BlockFrames::create_frames(&cx).unwrap();
    assert!(frames.performs_allocation());
    frames.finalize_frames(&cx).unwrap();

    let after_store = query_at(&mut frames, &cx, vec![5]);
    assert_eq!(after_store.locals, vec![0, 260]);
    assert_eq!(after_store.stack, vec![]);

    let at_return = query_at(&mut frames, &cx, vec![9]);
    assert_eq!(at_return.locals, vec![0, 260]);
    assert_eq!(at_return.stack, vec![(0, false)]);
}

#[test]
fn subroutine_bytecode_is_rejected() {
    let method = static_method(
        "()V",
        1,
        1,
        vec![JSR, 0x00, 0x03, RETURN],
        vec![],
        StackMapTable::default(),
    );
    let pool = ConstantsPool::new();
    let cx = MethodContext::new(&method, &pool, vec![0, 3]);

    let mut frames = BlockFrames::create_frames(&cx).unwrap();
    assert_eq!(
        frames.finalize_frames(&cx),
        Err(InterpretError::SubroutineBytecode {
            bci: 0,
            opcode: JSR
        })
    );
}

#[test]
fn unknown_opcode_is_rejected() {
    let method = static_method(
        "()V",
        1,
        1,
        vec![0xcb, RETURN],
        vec![],
        StackMapTable::default(),
    );
    let pool = ConstantsPool::new();
    // Block 1 starts uninitialized, so finalization cannot take its
    // nothing-to-refine early out and must decode block 0
    let cx = MethodContext::new(&method, &pool, vec![0, 1]);

    let mut frames = BlockFrames::create_frames(&cx).unwrap();
    assert_eq!(
        frames.finalize_frames(&cx),
        Err(InterpretError::UnknownOpcode {
            bci: 0,
            opcode: 0xcb
        })
    );
}

#[test]
fn finalize_is_a_no_op_when_seeding_covers_every_block() {
    // With a single block the signature seed already initializes the whole
    // frame table, so finalization has nothing to refine and returns without
    // decoding the bytecode, bad opcode and all
    let method = static_method(
        "()V",
        1,
        1,
        vec![0xcb, RETURN],
        vec![],
        StackMapTable::default(),
    );
    let pool = ConstantsPool::new();
    let cx = MethodContext::new(&method, &pool, vec![0]);

    let mut frames = BlockFrames::create_frames(&cx).unwrap();
    assert_eq!(frames.finalize_frames(&cx), Ok(()));
}

#[test]
fn chop_frame_underflow_is_rejected() {
    // One live local (the parameter); a chop frame dropping two of them is
    // inconsistent with the frames built up so far
    let stack_map_table = StackMapTable(vec![StackMapFrame::Chop {
        offset_delta: 1,
        chopped_k: 2,
    }]);
    let method = static_method("(Z)V", 1, 1, vec![NOP, RETURN], vec![], stack_map_table);
    let pool = ConstantsPool::new();
    let cx = MethodContext::new(&method, &pool, vec![0, 1]);

    assert_eq!(
        BlockFrames::create_frames(&cx).err(),
        Some(InterpretError::MalformedStackMap { bci: 1 })
    );
}

#[test]
fn queries_skip_unreachable_blocks() {
    //  0: return
    //  1: aconst_null (unreachable)
    //  2: areturn
    let method = static_method(
        "()V",
        1,
        1,
        vec![RETURN, ACONST_NULL, ARETURN],
        vec![],
        StackMapTable::default(),
    );
    let pool = ConstantsPool::new();
    let cx = MethodContext::new(&method, &pool, vec![0, 1]);

    let mut frames = BlockFrames::create_frames(&cx).unwrap();
    frames.finalize_frames(&cx).unwrap();
    assert!(!frames.is_frame_initialized(1));
    assert_eq!(frames.frames_to_strings(&cx)[1], "<uninitialized>");

    // A query inside the unreachable block reports nothing but still
    // terminates
    let unreachable = query_at(&mut frames, &cx, vec![1, 2]);
    assert_eq!(unreachable, CollectingVisitor::default());
}
