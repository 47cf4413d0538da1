//! Expansion of task selectors (`3`, `1-4`, `10-8`) into task numbers.

use crate::core::usage::UsageError;

/// Expand selector tokens into an ordered list of task numbers.
///
/// - `N` yields `[N]`.
/// - `A-B` with `A <= B` yields `A, A+1, ..., B`; with `A > B` it counts down.
/// - Tokens are concatenated in input order; duplicates are kept.
///
/// Any malformed token fails the whole expansion.
pub fn expand_task_ranges<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<u32>, UsageError> {
    let mut numbers = Vec::new();
    for token in tokens {
        expand_token(token.as_ref().trim(), &mut numbers)?;
    }
    Ok(numbers)
}

fn expand_token(token: &str, out: &mut Vec<u32>) -> Result<(), UsageError> {
    match token.split_once('-') {
        None => out.push(parse_number(token, token)?),
        Some((start, end)) => {
            let start = parse_number(start, token)?;
            let end = parse_number(end, token)?;
            if start <= end {
                out.extend(start..=end);
            } else {
                out.extend((end..=start).rev());
            }
        }
    }
    Ok(())
}

fn parse_number(raw: &str, token: &str) -> Result<u32, UsageError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UsageError::new(format!(
            "invalid task selector '{token}' (expected N or A-B)"
        )));
    }
    raw.parse::<u32>()
        .map_err(|_| UsageError::new(format!("task number out of range in '{token}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_mixed_selectors_in_order() {
        let numbers = expand_task_ranges(&["1-4", "6", "8-10"]).expect("expand");
        assert_eq!(numbers, vec![1, 2, 3, 4, 6, 8, 9, 10]);
    }

    #[test]
    fn descending_range_counts_down() {
        assert_eq!(expand_task_ranges(&["5-2"]).expect("expand"), vec![5, 4, 3, 2]);
    }

    #[test]
    fn single_element_range_and_bare_number() {
        assert_eq!(expand_task_ranges(&["7-7"]).expect("expand"), vec![7]);
        assert_eq!(expand_task_ranges(&["0"]).expect("expand"), vec![0]);
    }

    #[test]
    fn keeps_duplicates_and_overlaps() {
        let numbers = expand_task_ranges(&["2", "1-3", "2"]).expect("expand");
        assert_eq!(numbers, vec![2, 1, 2, 3, 2]);
    }

    #[test]
    fn ascending_ranges_cover_every_value() {
        for start in 0..6u32 {
            for end in start..8u32 {
                let token = format!("{start}-{end}");
                let expected: Vec<u32> = (start..=end).collect();
                assert_eq!(expand_task_ranges(&[token]).expect("expand"), expected);
            }
        }
    }

    #[test]
    fn rejects_malformed_tokens() {
        for bad in ["abc", "1-2-3", "-3", "4-", "", "1.5", "+2", "1 - 2x"] {
            assert!(
                expand_task_ranges(&[bad]).is_err(),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn empty_input_yields_empty_list() {
        let tokens: [&str; 0] = [];
        assert!(expand_task_ranges(&tokens).expect("expand").is_empty());
    }
}
