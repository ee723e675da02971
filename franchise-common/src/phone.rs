//! Phone number normalization
//!
//! Maps raw phone strings scraped by the search agents to the canonical
//! display form `+1 DDD-DDD-DDDD`.

/// Placeholder used when a record carries no phone number
pub const NO_PHONE: &str = "N/A";

/// Normalize a raw phone number for display
///
/// **Rules:**
/// - `"N/A"` or empty input stays `"N/A"`
/// - fewer than 10 digits: returned unchanged
/// - exactly 10 digits: `+1 DDD-DDD-DDDD`
/// - 11 digits starting with `1`: country code dropped, then as above
/// - anything longer: the last 10 digits, formatted as above
///
/// Total and idempotent: `normalize_phone(&normalize_phone(x)) == normalize_phone(x)`.
///
/// # Examples
///
/// ```
/// use franchise_common::normalize_phone;
///
/// assert_eq!(normalize_phone("(303) 832-6000"), "+1 303-832-6000");
/// assert_eq!(normalize_phone("N/A"), "N/A");
/// assert_eq!(normalize_phone("555-0123"), "555-0123");
/// ```
pub fn normalize_phone(raw: &str) -> String {
    if raw.is_empty() || raw == NO_PHONE {
        return NO_PHONE.to_string();
    }

    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() < 10 {
        return raw.to_string();
    }

    let national = if digits.len() == 11 && digits[0] == '1' {
        &digits[1..]
    } else {
        &digits[digits.len() - 10..]
    };

    let area: String = national[0..3].iter().collect();
    let exchange: String = national[3..6].iter().collect();
    let line: String = national[6..10].iter().collect();

    format!("+1 {}-{}-{}", area, exchange, line)
}

/// True when the value carries no phone number (blank or `"N/A"`)
pub fn is_missing(phone: &str) -> bool {
    phone.trim().is_empty() || phone == NO_PHONE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_digits_formatted() {
        assert_eq!(normalize_phone("2125550123"), "+1 212-555-0123");
        assert_eq!(normalize_phone("(212) 555-0123"), "+1 212-555-0123");
        assert_eq!(normalize_phone("212.555.0123"), "+1 212-555-0123");
    }

    #[test]
    fn test_eleven_digits_with_country_code() {
        assert_eq!(normalize_phone("+1 (303) 832-6000"), "+1 303-832-6000");
        assert_eq!(normalize_phone("13038326000"), "+1 303-832-6000");
    }

    #[test]
    fn test_long_numbers_keep_last_ten() {
        assert_eq!(normalize_phone("44 20 7946 0958"), "+1 207-946-0958");
        assert_eq!(normalize_phone("0012125550123"), "+1 212-555-0123");
        // 11 digits without a leading 1
        assert_eq!(normalize_phone("92125550123"), "+1 212-555-0123");
    }

    #[test]
    fn test_short_input_unchanged() {
        assert_eq!(normalize_phone("555-0123"), "555-0123");
        assert_eq!(normalize_phone("call us"), "call us");
    }

    #[test]
    fn test_missing_phone() {
        assert_eq!(normalize_phone("N/A"), "N/A");
        assert_eq!(normalize_phone(""), "N/A");
        assert!(is_missing(&normalize_phone("")));
        assert!(is_missing("  "));
        assert!(!is_missing("+1 212-555-0123"));
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "",
            "N/A",
            "(212) 555-0123",
            "+1 303 832 6000",
            "12125550123",
            "0012125550123",
            "44 20 7946 0958",
            "555-0123",
            "ext. 42",
            "  ",
        ];

        for input in inputs {
            let once = normalize_phone(input);
            assert_eq!(normalize_phone(&once), once, "not idempotent for {:?}", input);
        }
    }
}
