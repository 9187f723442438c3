use std::cmp::Ordering;

/// Format a phone number for display.
/// Ten-digit numbers are grouped in pairs (06 12 34 56 78); a leading
/// international prefix is kept in front.
pub fn format_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        10 => pairs(&digits),
        11 | 12 if phone.trim_start().starts_with('+') => {
            let (prefix, rest) = digits.split_at(digits.len() - 9);
            format!("+{} {} {}", prefix, &rest[..1], pairs(&rest[1..]))
        }
        _ => phone.to_string(),
    }
}

fn pairs(digits: &str) -> String {
    digits
        .as_bytes()
        .chunks(2)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate a string to a maximum number of characters, adding ellipsis if needed
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Case-insensitive substring test. `needle` must already be lowercase.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(needle)
}

/// Case-insensitive ordering without allocating.
pub fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Format a date string to a more readable format
pub fn format_date(date: &str) -> String {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(date) {
        dt.format("%d/%m/%Y").to_string()
    } else if let Ok(d) = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        d.format("%d/%m/%Y").to_string()
    } else {
        date.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_phone() {
        assert_eq!(format_phone("0612345678"), "06 12 34 56 78");
        assert_eq!(format_phone("06.12.34.56.78"), "06 12 34 56 78");
        assert_eq!(format_phone("+33612345678"), "+33 6 12 34 56 78");
        assert_eq!(format_phone("123"), "123"); // Too short, return as-is
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Hello", 10), "Hello");
        assert_eq!(truncate("Hello World", 8), "Hello...");
        assert_eq!(truncate("Hi", 2), "Hi");
        assert_eq!(truncate("Élodie Lefèvre", 9), "Élodie...");
    }

    #[test]
    fn test_contains_ignore_case() {
        assert!(contains_ignore_case("Benali", "ben"));
        assert!(contains_ignore_case("BENALI", "nali"));
        assert!(contains_ignore_case("anything", ""));
        assert!(!contains_ignore_case("Benali", "haddad"));
    }

    #[test]
    fn test_cmp_ignore_case() {
        assert_eq!(cmp_ignore_case("abc", "ABC"), Ordering::Equal);
        assert_eq!(cmp_ignore_case("Adam", "benali"), Ordering::Less);
        assert_eq!(cmp_ignore_case("zoe", "Yanis"), Ordering::Greater);
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date("2024-05-02T16:31:00Z"), "02/05/2024");
        assert_eq!(format_date("2019-03-14"), "14/03/2019");
        assert_eq!(format_date("soon"), "soon");
    }
}
