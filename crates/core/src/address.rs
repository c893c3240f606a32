//! Address normalization for CRM contact payloads.

/// Lower-cased country names (English and Polish) to ISO 3166-1 alpha-2.
const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("poland", "PL"),
    ("polska", "PL"),
    ("germany", "DE"),
    ("niemcy", "DE"),
    ("deutschland", "DE"),
    ("czech republic", "CZ"),
    ("czechia", "CZ"),
    ("czechy", "CZ"),
    ("slovakia", "SK"),
    ("słowacja", "SK"),
    ("ukraine", "UA"),
    ("ukraina", "UA"),
    ("lithuania", "LT"),
    ("litwa", "LT"),
    ("latvia", "LV"),
    ("łotwa", "LV"),
    ("estonia", "EE"),
    ("united kingdom", "GB"),
    ("great britain", "GB"),
    ("wielka brytania", "GB"),
    ("united states", "US"),
    ("usa", "US"),
    ("stany zjednoczone", "US"),
    ("france", "FR"),
    ("francja", "FR"),
    ("italy", "IT"),
    ("włochy", "IT"),
    ("spain", "ES"),
    ("hiszpania", "ES"),
    ("netherlands", "NL"),
    ("holandia", "NL"),
    ("niderlandy", "NL"),
    ("belgium", "BE"),
    ("belgia", "BE"),
    ("austria", "AT"),
    ("switzerland", "CH"),
    ("szwajcaria", "CH"),
    ("sweden", "SE"),
    ("szwecja", "SE"),
    ("norway", "NO"),
    ("norwegia", "NO"),
    ("denmark", "DK"),
    ("dania", "DK"),
    ("ireland", "IE"),
    ("irlandia", "IE"),
    ("hungary", "HU"),
    ("węgry", "HU"),
];

/// Resolves a free-text country to its ISO-2 code. Two-letter input is taken
/// as a code already; unknown names resolve to an empty string.
pub fn country_code(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.chars().count() == 2 && trimmed.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return trimmed.to_ascii_uppercase();
    }

    let normalized = trimmed.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    COUNTRY_NAMES
        .iter()
        .find(|(candidate, _)| *candidate == normalized)
        .map(|(_, code)| (*code).to_string())
        .unwrap_or_default()
}

/// Formats a postal code as `NN-NNN`: non-digits are dropped, short input is
/// left-padded with zeros and long input truncated to five digits.
pub fn normalize_postal_code(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return String::new();
    }

    let padded = format!("{digits:0>5}");
    let five = &padded[..5];
    format!("{}-{}", &five[..2], &five[2..])
}

#[cfg(test)]
mod tests {
    use super::{country_code, normalize_postal_code};

    #[test]
    fn country_names_resolve_in_both_languages() {
        assert_eq!(country_code("Poland"), "PL");
        assert_eq!(country_code(" polska "), "PL");
        assert_eq!(country_code("Wielka   Brytania"), "GB");
        assert_eq!(country_code("NIEMCY"), "DE");
    }

    #[test]
    fn two_letter_codes_pass_through_upper_cased() {
        assert_eq!(country_code("de"), "DE");
        assert_eq!(country_code("Pl"), "PL");
    }

    #[test]
    fn unknown_country_is_empty() {
        assert_eq!(country_code("Atlantis"), "");
        assert_eq!(country_code(""), "");
    }

    #[test]
    fn postal_codes_are_normalized() {
        assert_eq!(normalize_postal_code("00950"), "00-950");
        assert_eq!(normalize_postal_code("00-950"), "00-950");
        assert_eq!(normalize_postal_code(" 31 - 1 5 4 "), "31-154");
        assert_eq!(normalize_postal_code("123"), "00-123");
        assert_eq!(normalize_postal_code("1234567"), "12-345");
        assert_eq!(normalize_postal_code("PL-"), "");
    }
}
