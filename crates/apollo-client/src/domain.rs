/// Normalize a website/LinkedIn URL or bare domain for comparison and lookup.
///
/// Strips any `http://`/`https://` scheme and leading `www.`, trailing slashes, and
/// lower-cases the rest. Paths are kept so LinkedIn company URLs stay distinct.
/// Returns `None` when nothing usable remains or the input contains whitespace.
///
/// The result never starts with a scheme or `www.` and never ends with `/`, so
/// normalizing twice yields the same value.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let mut s = raw.trim().to_ascii_lowercase();

    loop {
        let before = s.len();
        for prefix in ["https://", "http://", "www."] {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest.to_string();
            }
        }
        let trimmed = s.trim_end_matches('/').len();
        s.truncate(trimmed);
        if s.len() == before {
            break;
        }
    }

    if s.is_empty() || s.chars().any(char::is_whitespace) || s.starts_with('/') {
        return None;
    }
    Some(s)
}

/// Split a comma-separated filter string into trimmed, non-empty items.
pub fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scheme_www_and_trailing_slash_case_insensitively() {
        assert_eq!(
            normalize_domain("HTTPS://WWW.Example.com/").as_deref(),
            Some("example.com")
        );
        assert_eq!(normalize_domain("example.com").as_deref(), Some("example.com"));
        assert_eq!(
            normalize_domain("http://example.com//").as_deref(),
            Some("example.com")
        );
    }

    #[test]
    fn keeps_paths() {
        assert_eq!(
            normalize_domain("https://www.linkedin.com/company/acme/").as_deref(),
            Some("linkedin.com/company/acme")
        );
    }

    #[test]
    fn is_idempotent() {
        for raw in [
            "HTTPS://WWW.Example.com/",
            "https://https://www.www.acme.io///",
            "linkedin.com/company/Acme/",
            "  apollo.io ",
        ] {
            let once = normalize_domain(raw).expect("normalizes");
            assert_eq!(normalize_domain(&once).as_deref(), Some(once.as_str()), "{raw}");
        }
    }

    #[test]
    fn empty_or_malformed_input_yields_none() {
        assert_eq!(normalize_domain(""), None);
        assert_eq!(normalize_domain("   "), None);
        assert_eq!(normalize_domain("https://"), None);
        assert_eq!(normalize_domain("www./"), None);
        assert_eq!(normalize_domain("exa mple.com"), None);
        assert_eq!(normalize_domain("https:///path"), None);
    }

    #[test]
    fn csv_items_are_trimmed() {
        assert_eq!(split_csv(" vp, director ,,c_suite"), vec!["vp", "director", "c_suite"]);
        assert!(split_csv(" , ").is_empty());
    }
}
