//! Registration heuristics: store-kind detection and display names.
//!
//! A source registered without a name is named from its page title when one
//! can be fetched ([`clean_page_title`] tidies it), otherwise from its URL
//! ([`derive_name`]).

use chrono::NaiveDate;
use url::Url;

use crate::models::StoreKind;

/// Detect the store kind from a listing URL's host.
pub fn detect_kind(url: &str) -> Option<StoreKind> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    match host.as_str() {
        "play.google.com" => Some(StoreKind::Playstore),
        "apps.apple.com" | "itunes.apple.com" => Some(StoreKind::Appstore),
        _ => None,
    }
}

/// Derive a display name for a source registered without one.
///
/// Category, collection and genre pages get a descriptive name built from
/// the path; developer pages get a generic label. Anything else falls back
/// to `"<Store> - <date>"`.
pub fn derive_name(url: &str, kind: StoreKind, today: NaiveDate) -> String {
    name_from_url(url, kind)
        .unwrap_or_else(|| format!("{} - {}", kind.label(), today.format("%Y-%m-%d")))
}

fn name_from_url(url: &str, kind: StoreKind) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    match kind {
        StoreKind::Playstore => {
            if let Some(category) = segment_after(&segments, "category") {
                return Some(format!("Play Store {} Category", title_case(category, '_')));
            }
            if let Some(collection) = segment_after(&segments, "collection") {
                return Some(format!(
                    "Play Store {} Collection",
                    title_case(collection, '_')
                ));
            }
            if parsed.query_pairs().any(|(k, _)| k == "id") {
                return Some("Play Store Developer Page".to_string());
            }
            None
        }
        StoreKind::Appstore => {
            if let Some(genre) = segment_after(&segments, "genre") {
                return Some(format!("App Store {} Genre", title_case(genre, '-')));
            }
            if segment_after(&segments, "developer").is_some() {
                return Some("App Store Developer Page".to_string());
            }
            None
        }
    }
}

fn segment_after<'a>(segments: &[&'a str], marker: &str) -> Option<&'a str> {
    let pos = segments.iter().position(|s| *s == marker)?;
    segments.get(pos + 1).copied()
}

/// Longest display name kept from a page title, in characters.
pub const MAX_TITLE_CHARS: usize = 60;

const STORE_SUFFIXES: [&str; 5] = [
    " - Android Apps on Google Play",
    " - Apps on Google Play",
    " - Google Play",
    " on the App Store",
    " - App Store",
];

const STORE_PREFIXES: [&str; 3] = ["Android Apps by ", "Apps by ", "Games by "];

// Trailing category words the stores append to developer and app titles.
const CATEGORY_WORDS: [&str; 22] = [
    "Education",
    "Games",
    "Productivity",
    "Entertainment",
    "Social",
    "Business",
    "Utilities",
    "Finance",
    "Health",
    "Travel",
    "Shopping",
    "News",
    "Sports",
    "Weather",
    "Music",
    "Photo",
    "Reference",
    "Medical",
    "Navigation",
    "Lifestyle",
    "Food",
    "Books",
];

/// Turn a raw page title into a display name.
///
/// Collapses whitespace, strips store suffixes (`" - Apps on Google Play"`,
/// `" on the App Store"`, ...), `"Apps by "`-style prefixes and a trailing
/// category word, then truncates to [`MAX_TITLE_CHARS`] with an ellipsis.
/// Returns `None` when fewer than three characters remain.
pub fn clean_page_title(raw: &str) -> Option<String> {
    let mut title = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    for suffix in STORE_SUFFIXES {
        if let Some(head) = strip_suffix_ignore_case(&title, suffix) {
            title = head.to_string();
        }
    }
    for prefix in STORE_PREFIXES {
        if let Some(tail) = strip_prefix_ignore_case(&title, prefix) {
            title = tail.to_string();
        }
    }
    if let Some((head, last)) = title.rsplit_once(' ') {
        if CATEGORY_WORDS.iter().any(|c| c.eq_ignore_ascii_case(last)) {
            title = head.to_string();
        }
    }

    let title = title.trim();
    let title = if title.chars().count() > MAX_TITLE_CHARS {
        let kept: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{}...", kept.trim_end())
    } else {
        title.to_string()
    };

    (title.chars().count() >= 3).then_some(title)
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let split = s.len().checked_sub(suffix.len())?;
    if !s.is_char_boundary(split) || !s[split..].eq_ignore_ascii_case(suffix) {
        return None;
    }
    Some(&s[..split])
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() < prefix.len() || !s.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, tail) = s.split_at(prefix.len());
    head.eq_ignore_ascii_case(prefix).then_some(tail)
}

/// `"MUSIC_AND_AUDIO"` with `'_'` → `"Music And Audio"`.
pub(crate) fn title_case(raw: &str, separator: char) -> String {
    raw.split(separator)
        .filter(|w| !w.is_empty())
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(
            detect_kind("https://play.google.com/store/apps/dev?id=123"),
            Some(StoreKind::Playstore)
        );
        assert_eq!(
            detect_kind("https://apps.apple.com/us/developer/acme/id42"),
            Some(StoreKind::Appstore)
        );
        assert_eq!(
            detect_kind("https://itunes.apple.com/us/genre/ios-games/id6014"),
            Some(StoreKind::Appstore)
        );
        assert_eq!(detect_kind("https://example.com/apps"), None);
        assert_eq!(detect_kind("not a url"), None);
    }

    #[test]
    fn test_play_category_and_collection_names() {
        assert_eq!(
            derive_name(
                "https://play.google.com/store/apps/category/GAME_PUZZLE?hl=en",
                StoreKind::Playstore,
                today()
            ),
            "Play Store Game Puzzle Category"
        );
        assert_eq!(
            derive_name(
                "https://play.google.com/store/apps/collection/topselling_free",
                StoreKind::Playstore,
                today()
            ),
            "Play Store Topselling Free Collection"
        );
    }

    #[test]
    fn test_developer_pages() {
        assert_eq!(
            derive_name(
                "https://play.google.com/store/apps/dev?id=5700313618786177705",
                StoreKind::Playstore,
                today()
            ),
            "Play Store Developer Page"
        );
        assert_eq!(
            derive_name(
                "https://apps.apple.com/us/developer/acme-inc/id284417353",
                StoreKind::Appstore,
                today()
            ),
            "App Store Developer Page"
        );
    }

    #[test]
    fn test_app_store_genre() {
        assert_eq!(
            derive_name(
                "https://apps.apple.com/us/genre/ios-health-fitness/id6013",
                StoreKind::Appstore,
                today()
            ),
            "App Store Ios Health Fitness Genre"
        );
    }

    #[test]
    fn test_clean_page_title_strips_store_text() {
        assert_eq!(
            clean_page_title("Acme Studios - Apps on Google Play").as_deref(),
            Some("Acme Studios")
        );
        assert_eq!(
            clean_page_title("Android Apps by Acme Corp - Google Play").as_deref(),
            Some("Acme Corp")
        );
        assert_eq!(
            clean_page_title("  Doodle   Jump on the app store ").as_deref(),
            Some("Doodle Jump")
        );
        assert_eq!(
            clean_page_title("Acme Puzzlers Games").as_deref(),
            Some("Acme Puzzlers")
        );
        // a single word is never treated as a category suffix
        assert_eq!(clean_page_title("Games").as_deref(), Some("Games"));
    }

    #[test]
    fn test_clean_page_title_length_rules() {
        assert_eq!(clean_page_title("ab"), None);
        assert_eq!(clean_page_title("Go - App Store"), None);

        let long = "Extremely Long Developer Name That Keeps Going Well Past Sixty Characters";
        let cleaned = clean_page_title(long).unwrap();
        assert!(cleaned.chars().count() <= MAX_TITLE_CHARS);
        assert_eq!(
            cleaned,
            "Extremely Long Developer Name That Keeps Going Well Past..."
        );
    }

    #[test]
    fn test_fallback_uses_date() {
        assert_eq!(
            derive_name("https://apps.apple.com/us/charts", StoreKind::Appstore, today()),
            "App Store - 2024-03-09"
        );
    }
}
