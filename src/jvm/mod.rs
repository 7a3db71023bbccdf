mod access_flags;
mod descriptors;
mod errors;

pub mod class_file;
pub mod opcodes;
pub mod refmaps;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
