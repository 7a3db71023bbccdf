const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-capacity bit set backed by `u64` words.
///
/// The capacity is chosen up front (a method's `max_locals` or `max_stack`
/// bound the index domain) and never grows. Combining operations report
/// whether they changed the receiver, which is what a dataflow fixpoint loop
/// keys its termination off of.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    pub fn new_empty(len: usize) -> BitSet {
        BitSet {
            words: vec![0; (len + WORD_BITS - 1) / WORD_BITS],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    pub fn set(&mut self, index: usize, value: bool) {
        debug_assert!(index < self.len);
        let mask = 1 << (index % WORD_BITS);
        if value {
            self.words[index / WORD_BITS] |= mask;
        } else {
            self.words[index / WORD_BITS] &= !mask;
        }
    }

    /// Intersect with `other`, returning true iff any bit was cleared.
    pub fn intersect_with(&mut self, other: &BitSet) -> bool {
        debug_assert_eq!(self.len, other.len);
        let mut changed = false;
        for (word, other_word) in self.words.iter_mut().zip(other.words.iter()) {
            let merged = *word & *other_word;
            changed |= merged != *word;
            *word = merged;
        }
        changed
    }

    /// Clear every bit at index `start` and above.
    pub fn clear_from(&mut self, start: usize) {
        if start >= self.len {
            return;
        }
        let word_index = start / WORD_BITS;
        self.words[word_index] &= (1u64 << (start % WORD_BITS)) - 1;
        for word in &mut self.words[word_index + 1..] {
            *word = 0;
        }
    }

    /// Overwrite this set with the contents of `other` without reallocating.
    pub fn copy_from(&mut self, other: &BitSet) {
        debug_assert_eq!(self.len, other.len);
        self.words.copy_from_slice(&other.words);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut bits = BitSet::new_empty(70);
        bits.set(0, true);
        bits.set(63, true);
        bits.set(64, true);
        assert!(bits.get(0));
        assert!(!bits.get(1));
        assert!(bits.get(63));
        assert!(bits.get(64));
        bits.set(63, false);
        assert!(!bits.get(63));
    }

    #[test]
    fn intersect_reports_change() {
        let mut a = BitSet::new_empty(8);
        let mut b = BitSet::new_empty(8);
        a.set(1, true);
        a.set(2, true);
        b.set(2, true);
        b.set(3, true);
        assert!(a.intersect_with(&b));
        assert!(!a.get(1));
        assert!(a.get(2));
        assert!(!a.get(3));
        // Already a subset: no further change
        assert!(!a.intersect_with(&b));
    }

    #[test]
    fn clear_from_truncates() {
        let mut bits = BitSet::new_empty(70);
        for i in 0..70 {
            bits.set(i, true);
        }
        bits.clear_from(65);
        assert!(bits.get(64));
        assert!(!bits.get(65));
        assert!(!bits.get(69));
        bits.clear_from(0);
        assert!(bits.is_empty());
    }
}
