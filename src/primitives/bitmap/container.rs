//! Low 16-bit containers backing [`super::ReachabilitySet`].
//!
//! A container stores the low halves of every member sharing one high key. Sparse
//! containers keep a sorted `u16` array; once an array grows past
//! [`ARRAY_LIMIT`] entries it is promoted to a fixed 8 KiB bitmap.

use std::slice;

/// Maximum number of members kept in array form.
pub(crate) const ARRAY_LIMIT: usize = 4096;
const WORDS: usize = 1024;

type Words = Box<[u64; WORDS]>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Container {
    Array(Vec<u16>),
    Bitmap { words: Words, len: u32 },
}

impl Default for Container {
    fn default() -> Self {
        Container::Array(Vec::new())
    }
}

#[inline]
fn word_bit(value: u16) -> (usize, u64) {
    ((value >> 6) as usize, 1u64 << (value & 63))
}

fn empty_words() -> Words {
    Box::new([0u64; WORDS])
}

impl Container {
    pub(crate) fn single(value: u16) -> Self {
        Container::Array(vec![value])
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Container::Array(values) => values.len(),
            Container::Bitmap { len, .. } => *len as usize,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn contains(&self, value: u16) -> bool {
        match self {
            Container::Array(values) => values.binary_search(&value).is_ok(),
            Container::Bitmap { words, .. } => {
                let (word, bit) = word_bit(value);
                words[word] & bit != 0
            }
        }
    }

    /// Inserts `value`, returning true when it was not yet present.
    pub(crate) fn insert(&mut self, value: u16) -> bool {
        match self {
            Container::Array(values) => match values.binary_search(&value) {
                Ok(_) => false,
                Err(pos) => {
                    values.insert(pos, value);
                    if values.len() > ARRAY_LIMIT {
                        let words = self.to_words();
                        *self = Container::Bitmap {
                            words,
                            len: (ARRAY_LIMIT + 1) as u32,
                        };
                    }
                    true
                }
            },
            Container::Bitmap { words, len } => {
                let (word, bit) = word_bit(value);
                if words[word] & bit != 0 {
                    return false;
                }
                words[word] |= bit;
                *len += 1;
                true
            }
        }
    }

    /// Removes `value`, returning true when it was present.
    pub(crate) fn remove(&mut self, value: u16) -> bool {
        let removed = match self {
            Container::Array(values) => match values.binary_search(&value) {
                Ok(pos) => {
                    values.remove(pos);
                    true
                }
                Err(_) => false,
            },
            Container::Bitmap { words, len } => {
                let (word, bit) = word_bit(value);
                if words[word] & bit == 0 {
                    false
                } else {
                    words[word] &= !bit;
                    *len -= 1;
                    true
                }
            }
        };
        if removed {
            self.demote();
        }
        removed
    }

    pub(crate) fn iter(&self) -> ContainerIter<'_> {
        match self {
            Container::Array(values) => ContainerIter::Array(values.iter()),
            Container::Bitmap { words, .. } => ContainerIter::Bitmap {
                words: &words[..],
                index: 0,
                current: words[0],
            },
        }
    }

    pub(crate) fn union(&self, other: &Container) -> Container {
        match (self, other) {
            (Container::Array(left), Container::Array(right)) => {
                let merged = merge_sorted(left, right, MergeOp::Union);
                if merged.len() > ARRAY_LIMIT {
                    Container::from_sorted_values(&merged)
                } else {
                    Container::Array(merged)
                }
            }
            _ => Container::combine_words(self, other, |a, b| a | b),
        }
    }

    pub(crate) fn intersect(&self, other: &Container) -> Container {
        match (self, other) {
            (Container::Array(left), Container::Array(right)) => {
                Container::Array(merge_sorted(left, right, MergeOp::Intersect))
            }
            (Container::Array(values), bitmap @ Container::Bitmap { .. })
            | (bitmap @ Container::Bitmap { .. }, Container::Array(values)) => Container::Array(
                values
                    .iter()
                    .copied()
                    .filter(|v| bitmap.contains(*v))
                    .collect(),
            ),
            _ => Container::combine_words(self, other, |a, b| a & b),
        }
    }

    pub(crate) fn symmetric_difference(&self, other: &Container) -> Container {
        match (self, other) {
            (Container::Array(left), Container::Array(right)) => {
                let merged = merge_sorted(left, right, MergeOp::Xor);
                if merged.len() > ARRAY_LIMIT {
                    Container::from_sorted_values(&merged)
                } else {
                    Container::Array(merged)
                }
            }
            _ => Container::combine_words(self, other, |a, b| a ^ b),
        }
    }

    fn to_words(&self) -> Words {
        match self {
            Container::Array(values) => {
                let mut words = empty_words();
                for value in values {
                    let (word, bit) = word_bit(*value);
                    words[word] |= bit;
                }
                words
            }
            Container::Bitmap { words, .. } => words.clone(),
        }
    }

    fn from_sorted_values(values: &[u16]) -> Container {
        let mut words = empty_words();
        for value in values {
            let (word, bit) = word_bit(*value);
            words[word] |= bit;
        }
        Container::Bitmap {
            words,
            len: values.len() as u32,
        }
    }

    fn combine_words(left: &Container, right: &Container, op: impl Fn(u64, u64) -> u64) -> Container {
        let mut words = left.to_words();
        let other = right.to_words();
        let mut len = 0u32;
        for (word, rhs) in words.iter_mut().zip(other.iter()) {
            *word = op(*word, *rhs);
            len += word.count_ones();
        }
        let mut container = Container::Bitmap { words, len };
        container.demote();
        container
    }

    fn demote(&mut self) {
        let sparse = matches!(self, Container::Bitmap { len, .. } if (*len as usize) <= ARRAY_LIMIT);
        if sparse {
            let values: Vec<u16> = self.iter().collect();
            *self = Container::Array(values);
        }
    }
}

#[derive(Clone, Copy)]
enum MergeOp {
    Union,
    Intersect,
    Xor,
}

fn merge_sorted(left: &[u16], right: &[u16], op: MergeOp) -> Vec<u16> {
    let mut out = Vec::with_capacity(match op {
        MergeOp::Intersect => left.len().min(right.len()),
        _ => left.len() + right.len(),
    });
    let (mut i, mut j) = (0usize, 0usize);
    while i < left.len() && j < right.len() {
        let (a, b) = (left[i], right[j]);
        if a == b {
            if matches!(op, MergeOp::Union | MergeOp::Intersect) {
                out.push(a);
            }
            i += 1;
            j += 1;
        } else if a < b {
            if !matches!(op, MergeOp::Intersect) {
                out.push(a);
            }
            i += 1;
        } else {
            if !matches!(op, MergeOp::Intersect) {
                out.push(b);
            }
            j += 1;
        }
    }
    if !matches!(op, MergeOp::Intersect) {
        out.extend_from_slice(&left[i..]);
        out.extend_from_slice(&right[j..]);
    }
    out
}

/// Ascending iterator over a container's low halves.
pub(crate) enum ContainerIter<'a> {
    Array(slice::Iter<'a, u16>),
    Bitmap {
        words: &'a [u64],
        index: usize,
        current: u64,
    },
}

impl Iterator for ContainerIter<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        match self {
            ContainerIter::Array(iter) => iter.next().copied(),
            ContainerIter::Bitmap {
                words,
                index,
                current,
            } => loop {
                if *current != 0 {
                    let bit = current.trailing_zeros();
                    *current &= *current - 1;
                    return Some(((*index as u32) * 64 + bit) as u16);
                }
                *index += 1;
                if *index >= words.len() {
                    return None;
                }
                *current = words[*index];
            },
        }
    }
}
