/// Keywords that follow the item name in the primary query.
const NAME_KEYWORDS: usize = 3;
/// Longer queries tend to come back empty on the marketplace.
const MAX_QUERY_TERMS: usize = 4;
/// Keywords used when the primary query is too narrow.
const BROAD_KEYWORDS: usize = 2;

/// Results below this count trigger one broader retry.
pub const SPARSE_RESULTS: u64 = 3;

/// Item name followed by the first three keywords, capped at four terms.
/// Blank terms are skipped so a missing name never yields a leading space.
pub fn build_query(item_name: &str, keywords: &[String]) -> String {
    std::iter::once(item_name)
        .chain(keywords.iter().take(NAME_KEYWORDS).map(String::as_str))
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .take(MAX_QUERY_TERMS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// The fallback query: first two keywords without the item name. Only
/// available when there is more than one keyword to broaden with.
pub fn broader_query(keywords: &[String]) -> Option<String> {
    if keywords.len() <= 1 {
        return None;
    }
    let query = keywords
        .iter()
        .take(BROAD_KEYWORDS)
        .map(|term| term.trim())
        .filter(|term| !term.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!query.is_empty()).then_some(query)
}

pub fn needs_broadening(total_found: u64, keywords: &[String]) -> bool {
    total_found < SPARSE_RESULTS && keywords.len() > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn name_plus_three_keywords_capped_at_four_terms() {
        let keywords = words(&["vintage", "kitchen", "lid", "rare", "pattern"]);
        assert_eq!(
            build_query("Pyrex Dish", &keywords),
            "Pyrex Dish vintage kitchen lid"
        );
    }

    #[test]
    fn short_keyword_lists_are_used_whole() {
        assert_eq!(build_query("Vase", &words(&["glass", "blue"])), "Vase glass blue");
        assert_eq!(build_query("Clock", &[]), "Clock");
    }

    #[test]
    fn blank_name_is_dropped() {
        assert_eq!(build_query("  ", &words(&["depression", "glass"])), "depression glass");
    }

    #[test]
    fn broader_query_uses_first_two_keywords() {
        let keywords = words(&["fire king", "jadeite", "mug"]);
        assert_eq!(broader_query(&keywords).as_deref(), Some("fire king jadeite"));
        assert_eq!(broader_query(&words(&["only"])), None);
    }

    #[test]
    fn broadening_threshold() {
        let two = words(&["glass", "blue"]);
        assert!(needs_broadening(2, &two));
        assert!(!needs_broadening(3, &two));
        assert!(!needs_broadening(5, &two));
        assert!(!needs_broadening(0, &words(&["glass"])));
    }
}
