//! Groups sparse tile indices into contiguous runs so each run is one
//! backend range request.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRun {
    pub start: usize,
    pub count: usize,
}

impl IndexRun {
    pub fn end(&self) -> usize {
        self.start + self.count
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end()
    }
}

/// Sort, dedupe and merge `indices` into maximal runs of consecutive values.
pub fn group_contiguous_indexes(indices: &[usize]) -> Vec<IndexRun> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut runs: Vec<IndexRun> = Vec::new();
    for idx in sorted {
        match runs.last_mut() {
            Some(run) if run.end() == idx => run.count += 1,
            _ => runs.push(IndexRun { start: idx, count: 1 }),
        }
    }
    runs
}

/// Break runs longer than `max_count` so no single request grows unbounded.
pub fn split_runs(runs: &[IndexRun], max_count: usize) -> Vec<IndexRun> {
    if max_count == 0 {
        return runs.to_vec();
    }
    let mut out = Vec::with_capacity(runs.len());
    for run in runs {
        let mut start = run.start;
        while start < run.end() {
            let count = max_count.min(run.end() - start);
            out.push(IndexRun { start, count });
            start += count;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn runs(pairs: &[(usize, usize)]) -> Vec<IndexRun> {
        pairs.iter().map(|&(start, count)| IndexRun { start, count }).collect()
    }

    #[test]
    fn test_group_ordered() {
        assert_eq!(group_contiguous_indexes(&[1, 2, 3, 4, 5]), runs(&[(1, 5)]));
        assert_eq!(group_contiguous_indexes(&[1, 2, 3, 5, 6]), runs(&[(1, 3), (5, 2)]));
        assert_eq!(group_contiguous_indexes(&[1, 2, 3, 5, 7]), runs(&[(1, 3), (5, 1), (7, 1)]));
        assert_eq!(
            group_contiguous_indexes(&[1, 2, 3, 5, 6, 7, 9, 10, 11]),
            runs(&[(1, 3), (5, 3), (9, 3)])
        );
        assert!(group_contiguous_indexes(&[]).is_empty());
    }

    #[test]
    fn test_group_unordered() {
        assert_eq!(group_contiguous_indexes(&[5, 4, 3, 2, 1]), runs(&[(1, 5)]));
        assert_eq!(group_contiguous_indexes(&[7, 5, 3, 2, 1]), runs(&[(1, 3), (5, 1), (7, 1)]));
        assert_eq!(
            group_contiguous_indexes(&[11, 8, 5, 19, 14, 12, 13]),
            runs(&[(5, 1), (8, 1), (11, 4), (19, 1)])
        );
    }

    #[test]
    fn test_group_is_order_independent() {
        let mut rng = rand::thread_rng();
        let mut input: Vec<usize> = vec![0, 1, 2, 9, 10, 40, 41, 42, 43, 100];
        let expected = group_contiguous_indexes(&input);
        for _ in 0..20 {
            input.shuffle(&mut rng);
            assert_eq!(group_contiguous_indexes(&input), expected);
        }
    }

    #[test]
    fn test_duplicates_collapse() {
        assert_eq!(group_contiguous_indexes(&[3, 3, 4, 4]), runs(&[(3, 2)]));
    }

    #[test]
    fn test_split_runs() {
        let split = split_runs(&runs(&[(0, 5), (10, 2)]), 2);
        assert_eq!(split, runs(&[(0, 2), (2, 2), (4, 1), (10, 2)]));
        assert_eq!(split_runs(&runs(&[(0, 5)]), 0), runs(&[(0, 5)]));
    }
}
