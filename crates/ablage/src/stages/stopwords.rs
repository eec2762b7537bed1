//! Stopword lists per text search configuration.
//!
//! Lists are embedded at compile time from `stopwords/<config>_stopwords.json`
//! and keyed by the configuration name the language stage stores (`french`,
//! `german`, ...). `simple` and any configuration without a list keep every
//! token.

use ahash::{AHashMap, AHashSet};
use once_cell::sync::Lazy;

macro_rules! embed_stopwords {
    ($map:expr, $( $config:literal ),* $(,)?) => {
        $(
            {
                const JSON: &str = include_str!(concat!("../../stopwords/", $config, "_stopwords.json"));
                match serde_json::from_str::<Vec<String>>(JSON) {
                    Ok(words) => {
                        let set: AHashSet<String> = words.into_iter().collect();
                        $map.insert($config.to_string(), set);
                    }
                    Err(e) => {
                        panic!(
                            "Failed to parse embedded stopwords for '{}': {}. The embedded JSON is malformed.",
                            $config, e
                        );
                    }
                }
            }
        )*
    };
}

/// Stopwords keyed by search configuration name.
pub static STOPWORDS: Lazy<AHashMap<String, AHashSet<String>>> = Lazy::new(|| {
    let mut map = AHashMap::new();
    embed_stopwords!(
        map,
        "dutch",
        "english",
        "french",
        "german",
        "italian",
        "portuguese",
        "spanish",
        "swedish",
    );
    map
});

/// Stopwords for a search configuration, matched case-insensitively.
///
/// Returns `None` for `simple` and for configurations without a list.
///
/// # Example
///
/// ```rust
/// use ablage::stages::stopwords::stopwords_for;
///
/// assert!(stopwords_for("French").unwrap().contains("le"));
/// assert!(stopwords_for("simple").is_none());
/// ```
pub fn stopwords_for(config: &str) -> Option<&'static AHashSet<String>> {
    if let Some(words) = STOPWORDS.get(config) {
        return Some(words);
    }
    STOPWORDS.get(config.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_list_loads() {
        for config in ["dutch", "english", "french", "german", "italian", "portuguese", "spanish", "swedish"] {
            let words = stopwords_for(config).unwrap_or_else(|| panic!("missing list for {config}"));
            assert!(words.len() > 50, "{config} has only {} words", words.len());
        }
    }

    #[test]
    fn test_lists_hold_function_words_only() {
        let english = stopwords_for("english").unwrap();
        assert!(english.contains("the"));
        assert!(!english.contains("invoice"));

        let german = stopwords_for("german").unwrap();
        assert!(german.contains("und"));
        assert!(german.contains("über"));
        assert!(!german.contains("rechnung"));
    }

    #[test]
    fn test_unlisted_configs_have_no_stopwords() {
        assert!(stopwords_for("simple").is_none());
        assert!(stopwords_for("klingon").is_none());
        assert!(stopwords_for("").is_none());
    }
}
