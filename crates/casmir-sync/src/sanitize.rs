//! Storage-key sanitization.
//!
//! Maps arbitrary filenames onto the restricted alphabet
//! `[A-Za-z0-9._()/-]` plus `_`. Only human-derived keys need this; the
//! content-addressed scheme (keys are hex digests) bypasses it entirely.
//!
//! The function is deterministic and idempotent: sanitizing an already
//! sanitized string is a no-op.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Explicit substitutions applied before unicode decomposition, chosen
/// to keep common names readable (umlaut transliteration, bracket
/// folding) rather than degrading straight to underscores.
const CHAR_REPLACEMENTS: &[(char, &str)] = &[
    ('ä', "ae"),
    ('ö', "oe"),
    ('ü', "ue"),
    ('ß', "ss"),
    ('Ä', "Ae"),
    ('Ö', "Oe"),
    ('Ü', "Ue"),
    ('[', "("),
    (']', ")"),
    ('{', "("),
    ('}', ")"),
    ('#', "_"),
    ('%', "_"),
    ('&', "_"),
    ('*', "_"),
    ('<', "_"),
    ('>', "_"),
    ('|', "_"),
    ('"', "_"),
    ('?', "_"),
    ('\\', "_"),
    (':', "_"),
];

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '(' | ')' | '-')
}

/// Sanitize a single key segment (no `/` handling).
pub fn sanitize_segment(name: &str) -> String {
    // Explicit substitutions first, so e.g. umlauts transliterate
    // instead of losing their diaeresis to NFKD stripping
    let mut replaced = String::with_capacity(name.len());
    'chars: for c in name.chars() {
        for (from, to) in CHAR_REPLACEMENTS {
            if c == *from {
                replaced.push_str(to);
                continue 'chars;
            }
        }
        replaced.push(c);
    }

    // NFKD decomposition, then drop combining marks (é -> e, ñ -> n)
    let decomposed: String = replaced.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    // Everything still outside the alphabet becomes an underscore
    let restricted: String = decomposed
        .chars()
        .map(|c| if is_allowed(c) { c } else { '_' })
        .collect();

    // Collapse runs of underscores
    let mut out = String::with_capacity(restricted.len());
    let mut prev_underscore = false;
    for c in restricted.chars() {
        if c == '_' {
            if !prev_underscore {
                out.push(c);
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }
    out
}

/// Sanitize a whole storage key, preserving `/` separators.
pub fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(sanitize_segment)
        .collect::<Vec<_>>()
        .join("/")
}
