//! Row decimation: which FFT rows a zoomed-out view shows and prefetches.

/// Rows shown from `current_row` when only every `step_size + 1`-th row is
/// displayed. Rows past the end of the recording are dropped.
pub fn displayed_rows(current_row: usize, step_size: usize, count: usize, total_rows: usize) -> Vec<usize> {
    let stride = step_size + 1;
    (0..count)
        .map(|i| current_row + i * stride)
        .take_while(|&row| row < total_rows)
        .collect()
}

/// Rows to prefetch on both sides of `displayed`, stepping outward with the
/// same stride. Bounded by the recording on each end.
pub fn padding_rows(displayed: &[usize], step_size: usize, padding: usize, total_rows: usize) -> Vec<usize> {
    let (Some(&first), Some(&last)) = (displayed.first(), displayed.last()) else {
        return Vec::new();
    };
    let stride = step_size + 1;
    let mut rows = Vec::with_capacity(padding * 2);
    for i in 1..=padding {
        let step = i * stride;
        if let Some(before) = first.checked_sub(step) {
            rows.push(before);
        }
        if last + step < total_rows {
            rows.push(last + step);
        }
    }
    rows
}
