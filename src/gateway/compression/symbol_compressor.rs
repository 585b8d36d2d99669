use super::CompressionStage;

/// Fixed glyph alphabet for substituted phrases.
const GLYPHS: &[char] = &['↹', '•', '⊕', 'Σ', '⊂', '→', '≡', '∴', '∀', '∃'];

/// Replaces a configured list of phrases with symbolic glyphs.
///
/// Lossy; decode is the identity. The phrase list is ordered longest-first so a longer phrase
/// is never shadowed by a shorter one that happens to be its prefix.
pub struct SymbolCompressor {
    phrases: Vec<(&'static str, char)>,
}

impl Default for SymbolCompressor {
    fn default() -> Self {
        let phrase_list = [
            "in other words",
            "as a result of",
            "for example",
            "in addition to",
            "on the other hand",
            "therefore",
            "however",
            "such that",
            "for all",
            "there exists",
        ];
        let mut phrases: Vec<(&'static str, char)> = phrase_list
            .iter()
            .copied()
            .zip(GLYPHS.iter().copied())
            .collect();
        phrases.sort_by_key(|(phrase, _)| std::cmp::Reverse(phrase.len()));
        Self { phrases }
    }
}

impl CompressionStage for SymbolCompressor {
    fn name(&self) -> &'static str {
        "symbol_compressor"
    }

    fn reversible(&self) -> bool {
        false
    }

    fn encode(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (phrase, glyph) in &self.phrases {
            if out.to_lowercase().contains(phrase) {
                out = replace_case_insensitive(&out, phrase, &glyph.to_string());
            }
        }
        out
    }

    fn decode(&self, text: &str) -> String {
        text.to_string()
    }
}

fn replace_case_insensitive(haystack: &str, needle: &str, replacement: &str) -> String {
    let lower_haystack = haystack.to_lowercase();
    let mut result = String::with_capacity(haystack.len());
    let mut rest = haystack;
    let mut lower_rest = lower_haystack.as_str();
    while let Some(pos) = lower_rest.find(needle) {
        result.push_str(&rest[..pos]);
        result.push_str(replacement);
        rest = &rest[pos + needle.len()..];
        lower_rest = &lower_rest[pos + needle.len()..];
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_known_phrase_with_glyph() {
        let s = SymbolCompressor::default();
        let encoded = s.encode("therefore we proceed");
        assert!(encoded.contains('∴'));
        assert!(!encoded.to_lowercase().contains("therefore"));
    }

    #[test]
    fn unmatched_text_is_untouched() {
        let s = SymbolCompressor::default();
        assert_eq!(s.encode("nothing special here"), "nothing special here");
    }

    #[test]
    fn decode_is_identity() {
        let s = SymbolCompressor::default();
        let encoded = s.encode("however it works");
        assert_eq!(s.decode(&encoded), encoded);
    }
}
