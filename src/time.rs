//! Bounded arithmetic and the pre-auth preference sort (spec C1).

/// Saturating 32-bit signed addition, used for `from = request_time + start_time`
/// and `rtime = from + renew_life` so a pathological `renew_life` can never wrap
/// a `KerberosTime` field around to the past.
pub fn addint32(x: i32, y: i32) -> i32 {
    match x.checked_add(y) {
        Some(sum) => sum,
        None if y >= 0 => i32::MAX,
        None => i32::MIN,
    }
}

/// Parse a `preferred_preauth_types` style config value (`"17, 16, 15, 14"`)
/// into an ordered list of type ids. Whitespace around commas is ignored;
/// entries that don't parse as an integer are skipped.
pub fn parse_preauth_preference(spec: &str) -> Vec<i32> {
    spec.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.trim().parse::<i32>().ok())
        .collect()
}

/// Stable-sort `entries` so that items whose `padata_type` appears in `preference`
/// come first, in the order they appear in `preference`, followed by every other
/// entry in its original relative order. An empty preference list is a no-op.
pub fn sort_padata_by_preference<T>(entries: &mut Vec<T>, preference: &[i32], padata_type: impl Fn(&T) -> i32) {
    if preference.is_empty() || entries.is_empty() {
        return;
    }

    let rank = |ty: i32| -> usize {
        preference
            .iter()
            .position(|&p| p == ty)
            .unwrap_or(preference.len())
    };

    // `sort_by_key` is a stable sort, so entries with equal rank (including the
    // "not in preference list" bucket) retain their original relative order.
    let mut indexed: Vec<(usize, T)> = entries.drain(..).enumerate().collect();
    indexed.sort_by_key(|(idx, item)| (rank(padata_type(item)), *idx));
    entries.extend(indexed.into_iter().map(|(_, item)| item));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addint32_no_overflow() {
        assert_eq!(addint32(10, 20), 30);
        assert_eq!(addint32(-10, 3), -7);
    }

    #[test]
    fn addint32_saturates_high() {
        assert_eq!(addint32(i32::MAX, 1), i32::MAX);
        assert_eq!(addint32(i32::MAX - 5, 100), i32::MAX);
    }

    #[test]
    fn addint32_saturates_low() {
        assert_eq!(addint32(i32::MIN, -1), i32::MIN);
        assert_eq!(addint32(i32::MIN + 5, -100), i32::MIN);
    }

    #[test]
    fn parses_default_preference() {
        assert_eq!(parse_preauth_preference("17, 16, 15, 14"), vec![17, 16, 15, 14]);
    }

    #[test]
    fn sort_moves_preferred_to_front_preserving_order() {
        // 2 and 9 are unlisted; they keep their original relative order
        // behind the preferred 17 and 16.
        let mut entries = vec![2i32, 16, 9, 17];
        let preference = [17, 16];
        sort_padata_by_preference(&mut entries, &preference, |v| *v);
        assert_eq!(entries, vec![17, 16, 2, 9]);
    }

    #[test]
    fn sort_is_noop_on_empty_preference() {
        let mut entries = vec![5i32, 1, 9];
        sort_padata_by_preference(&mut entries, &[], |v| *v);
        assert_eq!(entries, vec![5, 1, 9]);
    }
}
