use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::AppError;

pub const MAX_TAGS_PER_BOOKING: usize = 20;
pub const MAX_TAG_LENGTH: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

/// Lower-cases, trims and collapses inner whitespace. Blank tags become `None`.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let normalized = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

/// Normalizes a tag list, keeping the first occurrence of each tag.
pub fn normalize_tags<S: AsRef<str>>(raw: &[S]) -> Result<Vec<String>, AppError> {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    for tag in raw.iter().filter_map(|item| normalize_tag(item.as_ref())) {
        if tag.chars().count() > MAX_TAG_LENGTH {
            return Err(AppError::UnprocessableEntity(format!(
                "Tag '{tag}' is longer than {MAX_TAG_LENGTH} characters."
            )));
        }
        if seen.insert(tag.clone()) {
            tags.push(tag);
        }
    }
    if tags.len() > MAX_TAGS_PER_BOOKING {
        return Err(AppError::UnprocessableEntity(format!(
            "A booking can carry at most {MAX_TAGS_PER_BOOKING} tags."
        )));
    }
    Ok(tags)
}

/// Usage counts across bookings, most used first, ties alphabetical.
pub fn count_tags<'a, I>(tag_lists: I) -> Vec<TagCount>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for tags in tag_lists {
        for tag in tags {
            *counts.entry(tag.as_str()).or_insert(0) += 1;
        }
    }

    let mut ranked = counts
        .into_iter()
        .map(|(tag, count)| TagCount {
            tag: tag.to_string(),
            count,
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|left, right| {
        right
            .count
            .cmp(&left.count)
            .then_with(|| left.tag.cmp(&right.tag))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::{count_tags, normalize_tag, normalize_tags, MAX_TAGS_PER_BOOKING};

    #[test]
    fn normalizes_whitespace_and_case() {
        assert_eq!(normalize_tag("  Late   Check-in "), Some("late check-in".to_string()));
        assert_eq!(normalize_tag("   "), None);
    }

    #[test]
    fn deduplicates_preserving_first_occurrence() {
        let tags = normalize_tags(&["VIP", "repeat guest", "vip", " ", "Repeat  Guest"])
            .expect("valid tags");
        assert_eq!(tags, vec!["vip".to_string(), "repeat guest".to_string()]);
    }

    #[test]
    fn rejects_oversized_lists_and_tags() {
        let many = (0..=MAX_TAGS_PER_BOOKING)
            .map(|index| format!("tag-{index}"))
            .collect::<Vec<_>>();
        assert!(normalize_tags(&many).is_err());
        assert!(normalize_tags(&["x".repeat(41)]).is_err());
    }

    #[test]
    fn ranks_tags_by_usage_then_name() {
        let first = vec!["vip".to_string(), "family".to_string()];
        let second = vec!["family".to_string(), "anniversary".to_string()];
        let third = vec!["vip".to_string()];
        let ranked = count_tags([first.as_slice(), second.as_slice(), third.as_slice()]);

        let flat = ranked
            .iter()
            .map(|item| (item.tag.as_str(), item.count))
            .collect::<Vec<_>>();
        assert_eq!(flat, vec![("family", 2), ("vip", 2), ("anniversary", 1)]);
    }
}
