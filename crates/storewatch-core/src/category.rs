//! Best-effort category classification for notification payloads.
//!
//! Store links rarely carry a category, so this is heuristic: a Play Store
//! `category=` query parameter is mapped through the known code table,
//! then the link is matched against a short keyword list. Anything else is
//! `"Unknown"`.

use url::Url;

use crate::models::StoreKind;
use crate::naming::title_case;

pub const UNKNOWN_CATEGORY: &str = "Unknown";

const PLAY_CATEGORY_CODES: &[(&str, &str)] = &[
    ("GAME", "Games"),
    ("SOCIAL", "Social"),
    ("PRODUCTIVITY", "Productivity"),
    ("ENTERTAINMENT", "Entertainment"),
    ("EDUCATION", "Education"),
    ("BUSINESS", "Business"),
    ("LIFESTYLE", "Lifestyle"),
    ("TOOLS", "Tools"),
    ("COMMUNICATION", "Communication"),
    ("PHOTOGRAPHY", "Photography"),
    ("MUSIC_AND_AUDIO", "Music & Audio"),
    ("VIDEO_PLAYERS", "Video Players & Editors"),
    ("HEALTH_AND_FITNESS", "Health & Fitness"),
    ("TRAVEL_AND_LOCAL", "Travel & Local"),
    ("SHOPPING", "Shopping"),
    ("NEWS_AND_MAGAZINES", "News & Magazines"),
    ("FINANCE", "Finance"),
    ("SPORTS", "Sports"),
    ("BOOKS_AND_REFERENCE", "Books & Reference"),
    ("MEDICAL", "Medical"),
    ("AUTO_AND_VEHICLES", "Auto & Vehicles"),
    ("WEATHER", "Weather"),
    ("HOUSE_AND_HOME", "House & Home"),
    ("COMICS", "Comics"),
    ("LIBRARIES_AND_DEMO", "Libraries & Demo"),
    ("DATING", "Dating"),
    ("FOOD_AND_DRINK", "Food & Drink"),
    ("MAPS_AND_NAVIGATION", "Maps & Navigation"),
    ("BEAUTY", "Beauty"),
    ("EVENTS", "Events"),
    ("PARENTING", "Parenting"),
    ("ART_AND_DESIGN", "Art & Design"),
];

/// Map a Play Store category code to a readable name.
///
/// Unknown codes are title-cased: `"WATCH_FACE"` → `"Watch Face"`.
pub fn format_play_category(code: &str) -> String {
    PLAY_CATEGORY_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| title_case(code, '_'))
}

/// Classify an item link into a display category.
pub fn category_hint(link: &str, kind: StoreKind) -> String {
    if kind == StoreKind::Playstore {
        if let Ok(parsed) = Url::parse(link) {
            if let Some((_, code)) = parsed.query_pairs().find(|(k, _)| k == "category") {
                if !code.is_empty() {
                    return format_play_category(&code);
                }
            }
        }
    }

    let social = match kind {
        StoreKind::Playstore => "Social",
        StoreKind::Appstore => "Social Networking",
    };
    let keywords: [(&str, &str); 6] = [
        ("game", "Games"),
        ("social", social),
        ("productivity", "Productivity"),
        ("entertainment", "Entertainment"),
        ("education", "Education"),
        ("business", "Business"),
    ];

    keywords
        .iter()
        .find(|(needle, _)| link.contains(needle))
        .map(|(_, category)| category.to_string())
        .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string())
}
