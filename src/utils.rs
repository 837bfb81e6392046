use chrono::NaiveDate;

/// Parse a float that may use comma as decimal separator
pub fn parse_locale_float(s: &str) -> Result<f64, std::num::ParseFloatError> {
    s.trim().replace(',', ".").parse::<f64>()
}

/// Lowercases, trims and collapses inner whitespace. Empty input maps to `None`.
pub fn normalize_category(raw: Option<&str>) -> Option<String> {
    let joined = raw?.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined.to_lowercase())
    }
}

/// Turns a free-text phrase into a column-safe slug ("Salt Marsh" -> "salt_marsh").
pub fn slugify(phrase: &str) -> String {
    let mut slug = String::with_capacity(phrase.len());
    let mut pending_sep = false;
    for c in phrase.trim().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Splits a delimited phrase list into slugs, skipping blanks.
pub fn split_phrases(raw: Option<&str>, delimiter: &str) -> Vec<String> {
    match raw {
        Some(text) if !delimiter.is_empty() => text
            .split(delimiter)
            .map(slugify)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(text) => {
            let slug = slugify(text);
            if slug.is_empty() { Vec::new() } else { vec![slug] }
        }
        None => Vec::new(),
    }
}

/// Parses `YYYY-MM-DD`, tolerating a trailing time component (`T...` or ` ...`).
pub fn parse_measurement_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    let trimmed = raw.trim();
    let date_part = trimmed
        .split(|c: char| c == 'T' || c == ' ')
        .next()
        .unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
}

/// Interprets yes/no style flags. Unrecognised text yields `None`.
pub fn parse_bool_like(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_decimals_parse() {
        assert_eq!(parse_locale_float("7,25").unwrap(), 7.25);
        assert_eq!(parse_locale_float(" 12.5 ").unwrap(), 12.5);
        assert!(parse_locale_float("abc").is_err());
    }

    #[test]
    fn categories_normalize() {
        assert_eq!(normalize_category(Some("  Fresh   Water ")), Some("fresh water".into()));
        assert_eq!(normalize_category(Some("   ")), None);
        assert_eq!(normalize_category(None), None);
    }

    #[test]
    fn slugs_are_stable() {
        assert_eq!(slugify("Salt Marsh"), "salt_marsh");
        assert_eq!(slugify(" salt-marsh "), "salt_marsh");
        assert_eq!(slugify("Lake"), "lake");
        assert_eq!(slugify(" -- "), "");
    }

    #[test]
    fn phrases_split_on_delimiter() {
        assert_eq!(split_phrases(Some("Lake; Pond ;;"), ";"), vec!["lake", "pond"]);
        assert!(split_phrases(Some(""), ";").is_empty());
        assert!(split_phrases(None, ";").is_empty());
    }

    #[test]
    fn dates_accept_time_suffix() {
        let d = parse_measurement_date("2021-06-03T14:00:00").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2021, 6, 3).unwrap());
        assert!(parse_measurement_date("03/06/2021").is_err());
    }

    #[test]
    fn bool_like_flags() {
        assert_eq!(parse_bool_like("Yes"), Some(true));
        assert_eq!(parse_bool_like("0"), Some(false));
        assert_eq!(parse_bool_like("maybe"), None);
    }
}
