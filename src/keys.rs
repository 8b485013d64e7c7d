use std::collections::HashSet;

use thiserror::Error;

/// Circle-of-fifths bucket labels in fixed traversal order.
/// Buckets with two names hold enharmonically equivalent spellings joined
/// by `/`; a song key matches a bucket when it shares at least one name.
pub const CIRCLE_OF_FIFTHS: [&str; 12] = [
    "C", "G", "D", "A", "E", "B/Cb", "F#/Gb", "C#/Db", "G#/Ab", "D#/Eb", "A#/Bb", "F",
];

/// Chromatic pitch-class names indexed by the integer key code used by the
/// Spotify audio-features endpoint (0 = C, 11 = B).
pub const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#/Db", "D", "D#/Eb", "E", "F", "F#/Gb", "G", "G#/Ab", "A", "A#/Bb", "B",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("key '{key}' is not in the circle of fifths")]
pub struct UnresolvedKeyError {
    pub key: String,
}

/// Replace Unicode accidental glyphs with their ASCII spellings.
pub fn normalize_key(raw_key: &str) -> String {
    raw_key
        .trim()
        .replace('\u{266F}', "#")
        .replace('\u{266D}', "b")
}

/// Position of a key within [`CIRCLE_OF_FIFTHS`]. The key is normalized,
/// split on `/`, and matched against each bucket's own name parts; the
/// first bucket sharing a name wins.
pub fn key_index(raw_key: &str) -> Result<usize, UnresolvedKeyError> {
    let normalized = normalize_key(raw_key);
    let parts: HashSet<&str> = normalized.split('/').collect();
    CIRCLE_OF_FIFTHS
        .iter()
        .position(|label| label.split('/').any(|name| parts.contains(name)))
        .ok_or_else(|| UnresolvedKeyError {
            key: raw_key.to_string(),
        })
}

/// Display name for a remote integer key code, or None when out of range
/// (the service reports -1 for undetected keys).
pub fn pitch_class_name(code: i64) -> Option<&'static str> {
    usize::try_from(code)
        .ok()
        .and_then(|idx| PITCH_CLASS_NAMES.get(idx).copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pitch_class_name_resolves_to_a_bucket() {
        for name in PITCH_CLASS_NAMES {
            let idx = key_index(name).expect("canonical key name should resolve");
            let shares_a_name = CIRCLE_OF_FIFTHS[idx]
                .split('/')
                .any(|part| name.split('/').any(|p| p == part));
            assert!(shares_a_name, "{name} landed in bucket {idx}");
        }
    }

    #[test]
    fn table_order_spot_checks() {
        assert_eq!(key_index("C"), Ok(0));
        assert_eq!(key_index("G"), Ok(1));
        assert_eq!(key_index("D"), Ok(2));
        assert_eq!(key_index("F"), Ok(11));
    }

    #[test]
    fn unicode_accidentals_normalize() {
        assert_eq!(normalize_key("C\u{266F}/D\u{266D}"), "C#/Db");
        assert_eq!(key_index("C\u{266F}/D\u{266D}"), Ok(7));
        assert_eq!(key_index("F\u{266F}"), Ok(6));
    }

    #[test]
    fn single_enharmonic_spelling_matches_pair_bucket() {
        assert_eq!(key_index("Gb"), Ok(6));
        assert_eq!(key_index("F#"), Ok(6));
        assert_eq!(key_index("Cb"), Ok(5));
        assert_eq!(key_index("B"), Ok(5));
        assert_eq!(key_index("Eb"), Ok(9));
    }

    #[test]
    fn unresolved_keys_error_with_original_spelling() {
        for bad in ["Z", "H", "", "C# minor", "8A"] {
            let err = key_index(bad).unwrap_err();
            assert_eq!(err.key, bad);
        }
    }

    #[test]
    fn pitch_class_name_bounds() {
        assert_eq!(pitch_class_name(0), Some("C"));
        assert_eq!(pitch_class_name(1), Some("C#/Db"));
        assert_eq!(pitch_class_name(11), Some("B"));
        assert_eq!(pitch_class_name(12), None);
        assert_eq!(pitch_class_name(-1), None);
    }
}
