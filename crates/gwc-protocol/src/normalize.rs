//! Text folding and hashing used for identities.
//!
//! Group ids, nick lookups and mention detection all compare names through
//! [`normalize`], so `"Sala X"`, `"sala x"` and `"SÁLA X "` are the same room.

use sha2::{Digest, Sha256};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::types::GroupId;

/// Lowercase, strip diacritics and remove all whitespace.
pub fn normalize(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c) && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Hex SHA-256 of arbitrary text.
pub fn sha256_hex(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Deterministic group id for a room name.
pub fn group_id(name: &str) -> GroupId {
    GroupId(sha256_hex(&normalize(name)))
}

/// Hash carried in `JOIN_REQ`/`INVITE` and stored as `clave_hash`.
pub fn hash_password(password: &str) -> String {
    sha256_hex(password)
}

/// Similarity ratio in `[0, 1]` between two already-normalized strings,
/// based on Levenshtein distance.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// True if `text` contains `@nick` as a whole word, ignoring case and
/// diacritics.
pub fn mentions(text: &str, nick: &str) -> bool {
    let wanted = normalize(nick);
    if wanted.is_empty() {
        return false;
    }
    text.split('@').skip(1).any(|rest| {
        let word: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || *c == '.')
            .collect();
        let word = word.trim_end_matches('.');
        normalize(word) == wanted
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_accents_and_spaces() {
        assert_eq!(normalize("Ómar Sáez "), "omarsaez");
        assert_eq!(normalize("\tSala\u{00A0}X\n"), "salax");
        assert_eq!(normalize("ÑANDÚ"), "nandu");
    }

    #[test]
    fn group_id_ignores_case_accents_and_whitespace() {
        let a = group_id("Sala X");
        assert_eq!(a, group_id("sala x"));
        assert_eq!(a, group_id("SÁLA X "));
        assert_ne!(a, group_id("Sala Y"));
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn password_hash_is_sha256_hex() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("omar", "omar"), 1.0);
        assert!(similarity("omar", "omra") >= 0.5);
        assert!(similarity("omar", "zzzzzz") < 0.2);
    }

    #[test]
    fn mention_detection() {
        assert!(mentions("hola @Omar, ¿vienes?", "omar"));
        assert!(mentions("@ÓMAR.", "Omar"));
        assert!(!mentions("hola @omarcito", "omar"));
        assert!(!mentions("omar sin arroba", "omar"));
        assert!(!mentions("@", ""));
    }
}
