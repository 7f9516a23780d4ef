use std::ops::Range;

/// Splits `count` elements into `parts` contiguous, ordered ranges.
pub type PartitionFn = fn(count: usize, parts: usize) -> Vec<Range<usize>>;

/// Near-even split: the first `count % parts` ranges hold one extra element.
pub fn even_partition(count: usize, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }
    let (quo, rem) = (count / parts, count % parts);
    let mut ranges = Vec::with_capacity(parts);
    let mut begin = 0;
    for i in 0..parts {
        let len = if i < rem { quo + 1 } else { quo };
        ranges.push(begin..begin + len);
        begin += len;
    }
    ranges
}
