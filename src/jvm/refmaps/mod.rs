//! Abstract interpretation of bytecode to compute reference maps.
//!
//! A reference map answers, for a given bytecode index, which local variable
//! slots and operand stack slots hold object references. The interpreter
//! models only that one bit per slot: it tracks no values, just whether each
//! slot is a reference, and runs the usual iterative dataflow over the
//! method's basic blocks. Merging two frames intersects their reference
//! bits, so a slot is only a reference if it is one on every path. Bits move
//! monotonically from set to clear, which bounds the number of fixpoint
//! iterations.
//!
//! Frame states at block entries are kept in one of two encodings chosen by
//! [`BlockFrames::create_frames`]: a packed one-word-per-block encoding for
//! small methods that never allocates once created, and a bitset encoding
//! for everything else. The packed encoding is what makes it safe to call
//! [`BlockFrames::interpret_reference_slots`] from a stop-the-world garbage
//! collection pause.

mod context;
mod frames;
mod interpreter;
mod visitor;

pub use context::*;
pub use frames::*;
pub use visitor::*;
