use std::cmp::Ordering;

use crate::keys::{self, CIRCLE_OF_FIFTHS, UnresolvedKeyError};
use crate::types::Song;

/// At most this many songs from one key group make it into the output;
/// the rest of the group is dropped.
pub const MAX_GROUP_RUN: usize = 4;

/// Reorder songs for harmonic mixing: group by circle-of-fifths bucket,
/// walk the buckets in table order, and within each occupied bucket sort by
/// tempo in a direction that alternates from one occupied bucket to the
/// next (ascending first). Each group contributes at most
/// [`MAX_GROUP_RUN`] songs.
///
/// The input is never mutated; output songs carry normalized keys
/// (`♯`→`#`, `♭`→`b`). Any key that does not resolve to a bucket fails the
/// whole call with no partial result.
pub fn sequence(songs: &[Song]) -> Result<Vec<Song>, UnresolvedKeyError> {
    let mut buckets: [Vec<Song>; CIRCLE_OF_FIFTHS.len()] = Default::default();
    for song in songs {
        let mut song = song.clone();
        song.key = keys::normalize_key(&song.key);
        let index = keys::key_index(&song.key)?;
        buckets[index].push(song);
    }

    let mut ordered = Vec::with_capacity(songs.len());
    let mut descending = false;
    for bucket in &mut buckets {
        if bucket.is_empty() {
            continue;
        }
        // Stable sort: equal tempos keep their input order.
        if descending {
            bucket.sort_by(|a, b| b.bpm.partial_cmp(&a.bpm).unwrap_or(Ordering::Equal));
        } else {
            bucket.sort_by(|a, b| a.bpm.partial_cmp(&b.bpm).unwrap_or(Ordering::Equal));
        }
        ordered.extend(bucket.iter().take(MAX_GROUP_RUN).cloned());
        descending = !descending;
    }
    Ok(ordered)
}

/// Count songs per circle-of-fifths bucket without reordering anything.
/// Fails on the first unresolvable key, like [`sequence`].
pub fn bucket_sizes(songs: &[Song]) -> Result<[usize; CIRCLE_OF_FIFTHS.len()], UnresolvedKeyError> {
    let mut sizes = [0usize; CIRCLE_OF_FIFTHS.len()];
    for song in songs {
        sizes[keys::key_index(&song.key)?] += 1;
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: &str, bpm: f64, key: &str) -> Song {
        Song {
            id: id.to_string(),
            name: format!("song {id}"),
            artist: None,
            bpm,
            key: key.to_string(),
        }
    }

    fn ids(songs: &[Song]) -> Vec<&str> {
        songs.iter().map(|s| s.id.as_str()).collect()
    }

    fn bpms(songs: &[Song]) -> Vec<f64> {
        songs.iter().map(|s| s.bpm).collect()
    }

    #[test]
    fn every_canonical_key_name_is_accepted() {
        for (code, name) in crate::keys::PITCH_CLASS_NAMES.iter().enumerate() {
            let input = [song(&format!("t{code}"), 120.0, name)];
            let out = sequence(&input).expect("canonical key should sequence");
            assert_eq!(out.len(), 1, "{name} was dropped");
        }
    }

    #[test]
    fn group_truncates_to_four_lowest_when_ascending() {
        let input = [
            song("a", 100.0, "C"),
            song("b", 90.0, "C"),
            song("c", 80.0, "C"),
            song("d", 70.0, "C"),
            song("e", 60.0, "C"),
            song("f", 50.0, "C"),
        ];
        let out = sequence(&input).unwrap();
        assert_eq!(bpms(&out), vec![50.0, 60.0, 70.0, 80.0]);
        assert!(out.iter().all(|s| s.id != "a" && s.id != "b"));
    }

    #[test]
    fn buckets_are_visited_in_table_order() {
        // Input order deliberately scrambled relative to the table.
        let input = [
            song("d", 128.0, "D"),
            song("c", 122.0, "C"),
            song("g", 131.0, "G"),
        ];
        let out = sequence(&input).unwrap();
        assert_eq!(ids(&out), vec!["c", "g", "d"]);
    }

    #[test]
    fn tempo_direction_alternates_between_occupied_buckets() {
        let input = [
            song("c1", 60.0, "C"),
            song("c2", 50.0, "C"),
            song("g1", 60.0, "G"),
            song("g2", 50.0, "G"),
        ];
        let out = sequence(&input).unwrap();
        assert_eq!(bpms(&out), vec![50.0, 60.0, 60.0, 50.0]);
        assert_eq!(ids(&out), vec!["c2", "c1", "g1", "g2"]);
    }

    #[test]
    fn equal_tempos_keep_input_order() {
        let input = [
            song("first", 120.0, "C"),
            song("second", 120.0, "C"),
            song("third", 118.0, "C"),
        ];
        let out = sequence(&input).unwrap();
        assert_eq!(ids(&out), vec!["third", "first", "second"]);

        // Same property under a descending sort: occupy bucket 0 so the
        // direction has flipped by the time G is processed.
        let input = [
            song("opener", 100.0, "C"),
            song("first", 120.0, "G"),
            song("second", 120.0, "G"),
        ];
        let out = sequence(&input).unwrap();
        assert_eq!(ids(&out), vec!["opener", "first", "second"]);
    }

    #[test]
    fn empty_buckets_do_not_flip_direction() {
        // Buckets C and D occupied, G empty: D must get the direction
        // opposite to C, not the same one.
        let input = [
            song("c1", 60.0, "C"),
            song("c2", 50.0, "C"),
            song("d1", 60.0, "D"),
            song("d2", 50.0, "D"),
        ];
        let out = sequence(&input).unwrap();
        assert_eq!(bpms(&out), vec![50.0, 60.0, 60.0, 50.0]);
    }

    #[test]
    fn unresolved_key_fails_the_whole_call() {
        let input = [song("ok", 120.0, "C"), song("bad", 120.0, "Z")];
        let err = sequence(&input).unwrap_err();
        assert_eq!(err.key, "Z");
    }

    #[test]
    fn sorted_single_bucket_input_is_returned_unchanged() {
        let input = [
            song("a", 100.0, "A"),
            song("b", 110.0, "A"),
            song("c", 120.0, "A"),
            song("d", 130.0, "A"),
        ];
        let out = sequence(&input).unwrap();
        assert_eq!(ids(&out), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn caller_songs_are_not_mutated_and_output_keys_are_normalized() {
        let input = [song("u", 140.0, "C\u{266F}/D\u{266D}")];
        let out = sequence(&input).unwrap();
        assert_eq!(input[0].key, "C\u{266F}/D\u{266D}");
        assert_eq!(out[0].key, "C#/Db");
    }

    #[test]
    fn enharmonic_spellings_share_one_bucket() {
        // F# and Gb are the same table slot, so together they form one
        // group sorted in one direction.
        let input = [song("x", 130.0, "F#"), song("y", 125.0, "Gb")];
        let out = sequence(&input).unwrap();
        assert_eq!(ids(&out), vec!["y", "x"]);
    }

    #[test]
    fn bucket_sizes_counts_without_reordering() {
        let input = [
            song("a", 100.0, "C"),
            song("b", 90.0, "C"),
            song("c", 80.0, "F"),
        ];
        let sizes = bucket_sizes(&input).unwrap();
        assert_eq!(sizes[0], 2);
        assert_eq!(sizes[11], 1);
        assert_eq!(sizes[1..11].iter().sum::<usize>(), 0);
    }

    #[test]
    fn output_length_is_sum_of_capped_bucket_sizes() {
        let mut input = Vec::new();
        for i in 0..6 {
            input.push(song(&format!("c{i}"), 100.0 + i as f64, "C"));
        }
        for i in 0..3 {
            input.push(song(&format!("g{i}"), 100.0 + i as f64, "G"));
        }
        let out = sequence(&input).unwrap();
        assert_eq!(out.len(), 4 + 3);
    }
}
