use super::CompressionStage;

const VOWELS: &[char] = &['a', 'e', 'i', 'o', 'u', 'A', 'E', 'I', 'O', 'U'];

/// Strips internal vowels from words of length ≥ `min_len`, retaining the leading character
/// and any leading vowel. Lossy; decode is the identity — there is no attempt to
/// guess which vowels were removed.
pub struct VowelStripper {
    pub min_len: usize,
}

impl Default for VowelStripper {
    fn default() -> Self {
        Self { min_len: 4 }
    }
}

impl VowelStripper {
    fn strip_word(&self, word: &str) -> String {
        let chars: Vec<char> = word.chars().collect();
        if chars.len() < self.min_len {
            return word.to_string();
        }

        let mut out = String::new();
        let mut idx = 0;
        // Leading character is always kept.
        out.push(chars[0]);
        idx += 1;
        // A leading vowel immediately after the first character is also kept (spec: "retaining
        // the leading character and any leading vowel").
        if idx < chars.len() && VOWELS.contains(&chars[idx]) {
            out.push(chars[idx]);
            idx += 1;
        }
        // Internal vowels (not the final character, so word shape stays recognizable) are
        // stripped; the last character is always kept.
        for (i, &c) in chars.iter().enumerate().skip(idx) {
            if i == chars.len() - 1 {
                out.push(c);
            } else if !VOWELS.contains(&c) {
                out.push(c);
            }
        }
        out
    }
}

impl CompressionStage for VowelStripper {
    fn name(&self) -> &'static str {
        "vowel_stripper"
    }

    fn reversible(&self) -> bool {
        false
    }

    fn encode(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut word = String::new();
        for ch in text.chars() {
            if ch.is_alphabetic() {
                word.push(ch);
            } else {
                if !word.is_empty() {
                    out.push_str(&self.strip_word(&word));
                    word.clear();
                }
                out.push(ch);
            }
        }
        if !word.is_empty() {
            out.push_str(&self.strip_word(&word));
        }
        out
    }

    fn decode(&self, text: &str) -> String {
        text.to_string()
    }
}
