//! Slug handling for topic and subtopic keys.
//!
//! Keys are ASCII-lowercase hyphenated forms of human titles and are stable
//! path components in the object store. `slugify` is idempotent and emits
//! only `[a-z0-9-]` with no leading or trailing hyphens.

/// Slugify a human title into a stable key component.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_hyphen = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

/// Title-case a slug back into a display name.
///
/// Used only as a display fallback when the model echoes the key instead of
/// a human title.
pub fn deslugify(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("Data Handling"), "data-handling");
        assert_eq!(slugify("Fractions & Decimals"), "fractions-decimals");
        assert_eq!(slugify("  Place   Value  "), "place-value");
    }

    #[test]
    fn slugify_strips_edge_hyphens() {
        assert_eq!(slugify("-already-slugged-"), "already-slugged");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn slugify_is_idempotent() {
        for title in ["Data Handling", "3-D Shapes", "What is Matter?", "a--b"] {
            let once = slugify(title);
            assert_eq!(slugify(&once), once);
        }
    }

    #[test]
    fn deslugify_title_cases() {
        assert_eq!(deslugify("data-handling"), "Data Handling");
        assert_eq!(deslugify("place-value"), "Place Value");
        assert_eq!(deslugify(""), "");
    }

    proptest! {
        #[test]
        fn slugify_emits_only_slug_chars(input in "\\PC*") {
            let slug = slugify(&input);
            prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
            prop_assert!(!slug.starts_with('-'));
            prop_assert!(!slug.ends_with('-'));
        }

        #[test]
        fn slugify_idempotent_prop(input in "\\PC*") {
            let once = slugify(&input);
            prop_assert_eq!(slugify(&once), once.clone());
            prop_assert_eq!(slugify(&deslugify(&once)), once);
        }
    }
}
