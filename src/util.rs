mod bitset;

pub use bitset::BitSet;

/// Elements with a logical "width" in stack or local variable slots
///
/// Category-1 values (ints, floats, references, words) occupy one slot while
/// category-2 values (longs, doubles) occupy two.
pub trait Width {
    fn width(&self) -> usize;
}
