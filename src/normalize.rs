//! Repairs mis-encoded Spanish text and applies the title-casing rules used
//! for street names, destinations and line labels.

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};

/// Casing behaviour for everything after the first letter of a word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaseOptions {
    pub lowercase_rest: bool,
}

pub const LOWER_REST: CaseOptions = CaseOptions {
    lowercase_rest: true,
};
pub const KEEP_REST: CaseOptions = CaseOptions {
    lowercase_rest: false,
};

/// Known mis-transliterated token -> correct token substitutions: Spanish
/// words with their accented characters stripped by the upstream encoder, a
/// few multi-byte sequences decoded as Latin-1, and the literal "quinto"
/// the operator uses where signage says the Roman numeral.
const SPANISH_FIXUPS: &[(&str, &str)] = &[
    ("aragn", "aragón"),
    ("jess", "jesús"),
    ("peaflor", "peñaflor"),
    ("via", "vía"),
    ("espaa", "españa"),
    ("quinto", "V"),
    ("aljafera", "aljafería"),
    ("minguijn", "minguijón"),
    ("pilon", "pilón"),
    ("estimacin", "estimación"),
    ("jos", "josé"),
    ("Ã“", "Ó"),
    ("Ã", "Í"),
    ("Ã‰", "É"),
];

/// Words that stay lowercase anywhere but the start of a name.
pub const LOWERCASE_PARTICLES: &[&str] = &["y", "a", "de", "del", "la", "los", "las", "en"];

/// A versioned lookup table of substitutions. Corrections live here as data
/// so they can be tested and extended independently of the normalization
/// logic itself. Word tokens are matched at word boundaries; mis-decoded
/// multi-byte sequences contain punctuation-class characters and are matched
/// literally instead.
pub struct FixupTable {
    rules: Vec<(Regex, String)>,
}

impl FixupTable {
    pub fn new(entries: &[(&str, &str)]) -> FixupTable {
        let rules = entries
            .iter()
            .map(|(wrong, right)| {
                let matcher = RegexBuilder::new(&boundary_pattern(wrong))
                    .case_insensitive(true)
                    .build()
                    .expect("fixup entries are valid patterns");
                (matcher, (*right).to_string())
            })
            .collect();
        FixupTable { rules }
    }

    pub fn apply(&self, text: &str) -> String {
        let mut fixed = text.to_string();
        for (matcher, replacement) in &self.rules {
            fixed = matcher
                .replace_all(&fixed, replacement.as_str())
                .into_owned();
        }
        fixed
    }
}

fn is_word_char(character: char) -> bool {
    character.is_alphanumeric() || character == '_'
}

// \b only anchors against word characters, so it is applied per edge
fn boundary_pattern(wrong: &str) -> String {
    let leading = if wrong.chars().next().is_some_and(is_word_char) {
        r"\b"
    } else {
        ""
    };
    let trailing = if wrong.chars().last().is_some_and(is_word_char) {
        r"\b"
    } else {
        ""
    };
    format!("{}{}{}", leading, regex::escape(wrong), trailing)
}

lazy_static! {
    static ref SPANISH_TABLE: FixupTable = FixupTable::new(SPANISH_FIXUPS);
    static ref ROMAN_NUMERAL: Regex = Regex::new(r"^[IVXLCDM]+$").unwrap();
}

/// Lowercases, strips replacement-character glyphs and repairs known
/// mis-transliterations using the default Spanish table.
pub fn fix_encoding(text: &str) -> String {
    fix_encoding_with(&SPANISH_TABLE, text)
}

pub fn fix_encoding_with(table: &FixupTable, text: &str) -> String {
    let mut fixed = text.trim().to_lowercase();
    fixed = fixed.replace('\u{FFFD}', "");
    // "n0" shows up where the upstream encoder mangled "ñ"
    fixed = fixed.replacen("n0", "n", 1);
    table.apply(&fixed)
}

pub fn capitalize(text: &str, options: CaseOptions) -> String {
    let mut chars = text.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => {
            let rest = chars.as_str();
            let rest = if options.lowercase_rest {
                rest.to_lowercase()
            } else {
                rest.to_string()
            };
            format!("{}{}", first.to_uppercase(), rest)
        }
    }
}

/// All-uppercase sequences of Roman digits are kept verbatim ("III", never "Iii").
pub fn is_roman_numeral(word: &str) -> bool {
    !word.is_empty() && ROMAN_NUMERAL.is_match(word)
}

pub fn capitalize_each_word(text: &str, options: CaseOptions) -> String {
    capitalize_each_word_with(LOWERCASE_PARTICLES, text, options)
}

pub fn capitalize_each_word_with(particles: &[&str], text: &str, options: CaseOptions) -> String {
    text.split(' ')
        .enumerate()
        .map(|(index, word)| {
            let lower = word.to_lowercase();
            if index > 0 && particles.contains(&lower.as_str()) {
                return lower;
            }
            capitalize_compound(word, options)
        })
        .join(" ")
}

/// Words joined by "/" or "-" are capitalized per sub-token and rejoined
/// with the original separator.
fn capitalize_compound(word: &str, options: CaseOptions) -> String {
    if is_roman_numeral(word) {
        return word.to_string();
    }
    if word.contains('/') {
        return word
            .split('/')
            .map(|part| capitalize_compound(part.trim(), options))
            .join("/");
    }
    if word.contains('-') {
        return word
            .split('-')
            .map(|part| capitalize_compound(part.trim(), options))
            .join("-");
    }
    capitalize(word, options)
}
