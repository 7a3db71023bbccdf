use crate::jvm::class_file::{ConstantsPool, ExceptionHandler, Method};

/// Everything the interpreter needs to know about a method besides the
/// frame states themselves: the method, its constant pool, and a partition
/// of its bytecode into basic blocks.
///
/// Block boundaries must cover every control flow merge point: every branch
/// or switch target, every instruction following a conditional branch, and
/// every exception handler entry must start a block. Callers that already
/// have a control flow graph can expose it directly through this trait.
pub trait ReferenceMapContext {
    fn method(&self) -> &Method;

    fn constant_pool(&self) -> &ConstantsPool;

    fn num_blocks(&self) -> usize;

    /// Index of the block containing `bci`
    fn block_index_of(&self, bci: usize) -> usize;

    /// Starting bytecode index of a block. Passing `num_blocks()` yields the
    /// bytecode length, so a block's end is always the next block's start.
    fn block_start(&self, block: usize) -> usize;

    fn exception_handlers(&self) -> &[ExceptionHandler] {
        &self.method().code.exception_table
    }
}

/// Straightforward context over a method and a sorted list of block starts
pub struct MethodContext<'a> {
    method: &'a Method,
    pool: &'a ConstantsPool,
    block_starts: Vec<usize>,
}

impl<'a> MethodContext<'a> {
    /// `block_starts` must be sorted, deduplicated, and begin with 0.
    pub fn new(
        method: &'a Method,
        pool: &'a ConstantsPool,
        block_starts: Vec<usize>,
    ) -> MethodContext<'a> {
        debug_assert_eq!(block_starts.first(), Some(&0));
        debug_assert!(block_starts.windows(2).all(|w| w[0] < w[1]));
        MethodContext {
            method,
            pool,
            block_starts,
        }
    }
}

impl ReferenceMapContext for MethodContext<'_> {
    fn method(&self) -> &Method {
        self.method
    }

    fn constant_pool(&self) -> &ConstantsPool {
        self.pool
    }

    fn num_blocks(&self) -> usize {
        self.block_starts.len()
    }

    fn block_index_of(&self, bci: usize) -> usize {
        debug_assert!(bci < self.method.code.bytecode.len());
        self.block_starts.partition_point(|start| *start <= bci) - 1
    }

    fn block_start(&self, block: usize) -> usize {
        if block == self.block_starts.len() {
            self.method.code.bytecode.len()
        } else {
            self.block_starts[block]
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{Code, StackMapTable};
    use crate::jvm::{MethodAccessFlags, NoWordTypes};

    #[test]
    fn block_lookup() {
        let code = Code {
            max_stack: 1,
            max_locals: 1,
            bytecode: vec![0; 20],
            exception_table: vec![],
            stack_map_table: StackMapTable::default(),
        };
        let method = Method::new(
            MethodAccessFlags::STATIC,
            "pkg/Example",
            "f",
            "()V",
            code,
            &NoWordTypes,
        )
        .unwrap();
        let pool = ConstantsPool::new();
        let cx = MethodContext::new(&method, &pool, vec![0, 5, 12]);
        assert_eq!(cx.num_blocks(), 3);
        assert_eq!(cx.block_index_of(0), 0);
        assert_eq!(cx.block_index_of(4), 0);
        assert_eq!(cx.block_index_of(5), 1);
        assert_eq!(cx.block_index_of(11), 1);
        assert_eq!(cx.block_index_of(12), 2);
        assert_eq!(cx.block_index_of(19), 2);
        assert_eq!(cx.block_start(2), 12);
        assert_eq!(cx.block_start(3), 20);
    }
}
