//! Bounded edit-distance matching used by the citation verifier's fuzzy
//! pass. Row-swap dynamic programming keeps memory at O(min(m, n)).

/// Levenshtein edit distance between two character sequences.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };

    let mut prev: Vec<usize> = (0..=shorter.len()).collect();
    let mut curr = vec![0usize; shorter.len() + 1];

    for (i, lc) in longer.iter().enumerate() {
        curr[0] = i + 1;
        for (j, sc) in shorter.iter().enumerate() {
            let cost = usize::from(lc != sc);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[shorter.len()]
}

/// `1 - distance / max(len_a, len_b)`, clamped to `[0, 1]`; `1.0` for two
/// empty strings.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein_distance(a, b);
    (1.0 - (distance as f64 / max_len as f64)).clamp(0.0, 1.0)
}

/// The corrected accept threshold for fuzzy citation matching: an absolute
/// floor of 8 characters, or 2% of the quote's length, whichever is larger.
pub fn max_fuzzy_distance(quote_len: usize) -> usize {
    8.max((quote_len as f64 * 0.02).floor() as usize)
}

/// Slides windows of several sizes relative to `quote`'s length across
/// `haystack`, returning the minimum edit distance found and the matching
/// window's character offsets. Coarse step (`window / 20`) keeps this
/// sub-linear in chunk size.
pub fn find_best_match_window(quote: &str, haystack: &str) -> Option<(usize, usize, usize)> {
    let quote_len = quote.chars().count();
    if quote_len == 0 {
        return None;
    }
    let haystack_chars: Vec<char> = haystack.chars().collect();
    let haystack_len = haystack_chars.len();

    let mut best: Option<(usize, usize, usize)> = None;

    for ratio in [1.0, 0.9, 1.1, 0.95, 1.05_f64] {
        let window_len = ((quote_len as f64) * ratio).round().max(1.0) as usize;
        if window_len > haystack_len {
            continue;
        }
        let step = (window_len / 20).max(1);

        let mut start = 0usize;
        while start + window_len <= haystack_len {
            let window: String = haystack_chars[start..start + window_len].iter().collect();
            let distance = levenshtein_distance(quote, &window);

            if best.map_or(true, |(best_distance, _, _)| distance < best_distance) {
                best = Some((distance, start, start + window_len));
            }
            if distance == 0 {
                return best;
            }
            start += step;
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_zero_for_identical_strings() {
        assert_eq!(levenshtein_distance("roll two dice", "roll two dice"), 0);
    }

    #[test]
    fn distance_counts_single_substitution() {
        assert_eq!(levenshtein_distance("cat", "bat"), 1);
    }

    #[test]
    fn similarity_ratio_of_empty_strings_is_one() {
        assert!((similarity_ratio("", "") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn max_fuzzy_distance_uses_absolute_floor_for_short_quotes() {
        assert_eq!(max_fuzzy_distance(10), 8);
    }

    #[test]
    fn max_fuzzy_distance_scales_for_long_quotes() {
        assert_eq!(max_fuzzy_distance(1000), 20);
    }

    #[test]
    fn find_best_match_window_locates_exact_substring() {
        let haystack = "players may move up to three spaces then attack once per turn";
        let quote = "move up to three spaces";
        let (distance, start, end) = find_best_match_window(quote, haystack).expect("match");
        assert_eq!(distance, 0);
        let chars: Vec<char> = haystack.chars().collect();
        let window: String = chars[start..end].iter().collect();
        assert_eq!(window, quote);
    }

    #[test]
    fn find_best_match_window_tolerates_small_edits() {
        let haystack = "players may move up to three spaces then attack once per turn";
        let quote = "move up too three space";
        let (distance, _, _) = find_best_match_window(quote, haystack).expect("match");
        assert!(distance <= max_fuzzy_distance(quote.len()));
    }
}
