//! Edit distance

/// Simple Levenshtein distance over characters
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Levenshtein distance if it is at most `max`.
///
/// Only the diagonal band of width `2 * max + 1` is computed, and the scan stops
/// as soon as every cell of a row exceeds `max`.
pub fn levenshtein_within(a: &[char], b: &[char], max: usize) -> Option<usize> {
    let (n, m) = (a.len(), b.len());
    if n.abs_diff(m) > max {
        return None;
    }
    if n == 0 || m == 0 {
        return Some(n.max(m));
    }

    let over = max + 1;
    let mut prev: Vec<usize> = (0..=m).map(|j| j.min(over)).collect();
    let mut curr = vec![over; m + 1];

    for i in 1..=n {
        let lo = i.saturating_sub(max).max(1);
        let hi = (i + max).min(m);
        curr.iter_mut().for_each(|c| *c = over);
        curr[0] = if i <= max { i } else { over };

        let mut row_min = curr[0];
        for j in lo..=hi {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            let value = (prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(prev[j - 1] + cost)
                .min(over);
            curr[j] = value;
            row_min = row_min.min(value);
        }
        if row_min > max {
            return None;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let d = prev[m];
    (d <= max).then_some(d)
}

/// Normalized similarity in `[0, 1]`: `1 - distance / max_len`
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}
