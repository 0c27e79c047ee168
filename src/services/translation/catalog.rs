// Supported translation targets: language code -> display name

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

static LANGUAGES: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("en", "English"),
        ("es", "Spanish"),
        ("fr", "French"),
        ("de", "German"),
        ("it", "Italian"),
        ("pt", "Portuguese"),
        ("ru", "Russian"),
        ("zh", "Chinese (Simplified)"),
        ("ja", "Japanese"),
        ("ko", "Korean"),
        ("ar", "Arabic"),
        ("hi", "Hindi"),
        ("ta", "Tamil"),
        ("te", "Telugu"),
        ("ml", "Malayalam"),
        ("kn", "Kannada"),
        ("mr", "Marathi"),
        ("bn", "Bengali"),
        ("gu", "Gujarati"),
        ("ur", "Urdu"),
        ("pa", "Punjabi"),
        ("ne", "Nepali"),
        ("si", "Sinhala"),
        ("my", "Myanmar"),
        ("th", "Thai"),
        ("vi", "Vietnamese"),
        ("id", "Indonesian"),
        ("ms", "Malay"),
        ("tl", "Filipino"),
    ])
});

pub fn languages() -> &'static BTreeMap<&'static str, &'static str> {
    &LANGUAGES
}

pub fn is_supported(code: &str) -> bool {
    LANGUAGES.contains_key(code)
}
