//! CNPJ (Brazilian legal-entity tax id) check-digit validation.

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Mod-11 check digit: remainders 0 and 1 map to 0.
fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        r if r < 2 => 0,
        r => 11 - r,
    }
}

/// True when `raw` holds 14 digits (punctuation ignored), not all the same,
/// whose two trailing digits match the computed check digits.
pub fn is_valid_cnpj(raw: &str) -> bool {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 14 || digits.iter().all(|&d| d == digits[0]) {
        return false;
    }

    check_digit(&digits[..12], &FIRST_WEIGHTS) == digits[12]
        && check_digit(&digits[..13], &SECOND_WEIGHTS) == digits[13]
}

/// Only the ASCII digits of a tax id.
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &[&str] = &[
        "11222333000181",
        "33000167000101",
        "12345678000195",
        "00000000000191",
    ];

    #[test]
    fn test_valid_cnpjs() {
        for cnpj in VALID {
            assert!(is_valid_cnpj(cnpj), "{cnpj}");
        }
    }

    #[test]
    fn test_punctuation_is_ignored() {
        assert!(is_valid_cnpj("11.222.333/0001-81"));
        assert!(is_valid_cnpj(" 33.000.167/0001-01 "));
    }

    #[test]
    fn test_any_single_digit_mutation_is_rejected() {
        for cnpj in VALID {
            let original: Vec<char> = cnpj.chars().collect();
            for pos in 0..original.len() {
                for digit in '0'..='9' {
                    if digit == original[pos] {
                        continue;
                    }
                    let mut mutated = original.clone();
                    mutated[pos] = digit;
                    let mutated: String = mutated.into_iter().collect();
                    assert!(!is_valid_cnpj(&mutated), "{cnpj} -> {mutated}");
                }
            }
        }
    }

    #[test]
    fn test_repeated_digits_rejected() {
        for d in '0'..='9' {
            let cnpj: String = std::iter::repeat(d).take(14).collect();
            assert!(!is_valid_cnpj(&cnpj), "{cnpj}");
        }
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(!is_valid_cnpj(""));
        assert!(!is_valid_cnpj("1122233300018"));
        assert!(!is_valid_cnpj("112223330001810"));
        assert!(!is_valid_cnpj("abc"));
    }

    #[test]
    fn test_check_digit_low_remainder_maps_to_zero() {
        assert_eq!(check_digit(&[0; 12], &FIRST_WEIGHTS), 0);
        assert_eq!(
            check_digit(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1], &FIRST_WEIGHTS),
            9
        );
    }

    #[test]
    fn test_digits_only() {
        assert_eq!(digits_only("11.222.333/0001-81"), "11222333000181");
        assert_eq!(digits_only(""), "");
    }
}
