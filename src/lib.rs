//! Reference-map interpretation for JVM bytecode.
//!
//! Given a method's bytecode and a basic-block partition of it, the
//! [`jvm::refmaps`] module computes, at any bytecode position, which local
//! variable slots and operand stack slots hold object references. A garbage
//! collector scanning an interpreted frame needs exactly this information:
//! treating a raw word as a pointer corrupts the heap, and treating a pointer
//! as a raw word loses the object.

pub mod jvm;
pub mod util;
