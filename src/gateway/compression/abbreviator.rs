use std::collections::HashMap;
use std::sync::OnceLock;

use super::CompressionStage;

/// Dictionary-driven word-boundary substitution, e.g. `"function"` ↔ `"fn"`.
///
/// Lossy but semantically preserving: decode runs the reverse dictionary, which restores the
/// long form whenever the abbreviation is unambiguous (the common case, since the dictionary is
/// constructed as a bijection) but is a heuristic restoration, not a guaranteed exact inverse —
/// an abbreviation that also occurs naturally in the input will be "restored" regardless.
#[derive(Default)]
pub struct Abbreviator;

fn forward_dict() -> &'static [(&'static str, &'static str)] {
    &[
        ("function", "fn"),
        ("because", "bc"),
        ("with", "w/"),
        ("without", "w/o"),
        ("and", "&"),
        ("you", "u"),
        ("your", "ur"),
        ("are", "r"),
        ("before", "b4"),
        ("please", "pls"),
        ("message", "msg"),
        ("configuration", "config"),
        ("application", "app"),
        ("information", "info"),
        ("environment", "env"),
        ("repository", "repo"),
        ("parameter", "param"),
        ("argument", "arg"),
        ("response", "resp"),
        ("request", "req"),
    ]
}

fn reverse_map() -> &'static HashMap<&'static str, &'static str> {
    static CELL: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    CELL.get_or_init(|| forward_dict().iter().map(|(long, short)| (*short, *long)).collect())
}

fn substitute_words(text: &str, dict: impl Fn(&str) -> Option<&'static str>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut String| {
        if word.is_empty() {
            return;
        }
        let lower = word.to_lowercase();
        match dict(&lower) {
            Some(replacement) => out.push_str(replacement),
            None => out.push_str(word),
        }
        word.clear();
    };

    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '/' {
            word.push(ch);
        } else {
            flush(&mut word, &mut out);
            out.push(ch);
        }
    }
    flush(&mut word, &mut out);
    out
}

impl CompressionStage for Abbreviator {
    fn name(&self) -> &'static str {
        "abbreviator"
    }

    fn reversible(&self) -> bool {
        false
    }

    fn encode(&self, text: &str) -> String {
        substitute_words(text, |w| {
            forward_dict().iter().find(|(long, _)| *long == w).map(|(_, short)| *short)
        })
    }

    fn decode(&self, text: &str) -> String {
        substitute_words(text, |w| reverse_map().get(w).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviates_on_word_boundary() {
        let a = Abbreviator::default();
        assert_eq!(a.encode("please send the message"), "pls send the msg");
    }

    #[test]
    fn does_not_touch_unrelated_substrings() {
        let a = Abbreviator::default();
        assert_eq!(a.encode("functionally"), "functionally");
    }

    #[test]
    fn decode_restores_long_form() {
        let a = Abbreviator::default();
        let encoded = a.encode("please review your config");
        assert_eq!(a.decode(&encoded), "please review your configuration");
    }
}
