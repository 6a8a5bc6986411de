//! Static category list used by the feed filter and for labelling videos.

/// Pseudo-category that maps to the popular listing instead of a search.
pub const ALL_CATEGORY: &str = "All";

/// Catch-all label for videos whose tags match no category.
pub const FALLBACK_CATEGORY: &str = "Misc";

/// Categories offered by the feed filter, in display order.
pub const CATEGORIES: &[&str] = &[
    ALL_CATEGORY,
    "Nature",
    "Animals",
    "Travel",
    "Food",
    "Sports",
    "Music",
    "People",
    "Places",
    "Science",
    "Business",
    "Education",
    "Health",
    "Fashion",
    "Buildings",
    "Industry",
    "Computer",
    "Transportation",
    "Backgrounds",
    "Feelings",
    "Religion",
];

/// Derives a display category from a comma-separated tag string.
///
/// Tags are checked in order; the first one that names a category
/// (case-insensitively) wins. "All" is a filter, not a label, and never
/// matches.
///
/// ```
/// use streamshelf::catalog::category_from_tags;
///
/// assert_eq!(category_from_tags("lake, nature, sunrise"), "Nature");
/// assert_eq!(category_from_tags("abstract, loop"), "Misc");
/// ```
pub fn category_from_tags(tags: &str) -> &'static str {
    tags.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .find_map(|tag| {
            CATEGORIES[1..]
                .iter()
                .find(|name| name.eq_ignore_ascii_case(tag))
                .copied()
        })
        .unwrap_or(FALLBACK_CATEGORY)
}

/// Canonical spelling of a category name, if it is one of [`CATEGORIES`].
pub fn canonical_category(name: &str) -> Option<&'static str> {
    CATEGORIES
        .iter()
        .find(|c| c.eq_ignore_ascii_case(name.trim()))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_matching_tag_wins() {
        assert_eq!(category_from_tags("dog, animals, nature"), "Animals");
        assert_eq!(category_from_tags("nature, animals"), "Nature");
    }

    #[test]
    fn test_match_is_case_insensitive() {
        assert_eq!(category_from_tags("SPORTS, ball"), "Sports");
        assert_eq!(category_from_tags("  music  ,guitar"), "Music");
    }

    #[test]
    fn test_all_is_never_a_label() {
        assert_eq!(category_from_tags("all, loop"), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_empty_tags_fall_back() {
        assert_eq!(category_from_tags(""), FALLBACK_CATEGORY);
        assert_eq!(category_from_tags(", ,"), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_canonical_category() {
        assert_eq!(canonical_category("nature"), Some("Nature"));
        assert_eq!(canonical_category(" ALL "), Some(ALL_CATEGORY));
        assert_eq!(canonical_category("cooking"), None);
    }

    proptest! {
        #[test]
        fn prop_label_is_known_category(tags in "[a-zA-Z, ]{0,60}") {
            let label = category_from_tags(&tags);
            prop_assert!(label == FALLBACK_CATEGORY || CATEGORIES[1..].contains(&label));
        }
    }
}
