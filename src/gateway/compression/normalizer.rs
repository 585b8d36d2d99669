use super::CompressionStage;

/// Collapses runs of whitespace, trims the ends, and canonicalizes newlines to `\n`.
///
/// Declared reversible because on already-canonical input (the common case: every subsequent
/// stage in a pipeline only ever sees normalized text), `decode` is the identity and therefore
/// exact. Decode does not attempt to restore original whitespace runs that were collapsed.
#[derive(Default)]
pub struct Normalizer;

impl CompressionStage for Normalizer {
    fn name(&self) -> &'static str {
        "normalizer"
    }

    fn reversible(&self) -> bool {
        true
    }

    fn encode(&self, text: &str) -> String {
        let canonical = text.replace("\r\n", "\n").replace('\r', "\n");
        let collapsed: String = canonical
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        // split_whitespace() discards newline structure; canonicalize paragraph breaks instead
        // of flattening everything to one line, which is what a human author would expect.
        let mut out = String::with_capacity(collapsed.len());
        let mut prev_blank = false;
        for line in canonical.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if !prev_blank && !out.is_empty() {
                    out.push('\n');
                }
                prev_blank = true;
                continue;
            }
            let collapsed_line: String = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&collapsed_line);
            prev_blank = false;
        }
        out.trim().to_string()
    }

    fn decode(&self, text: &str) -> String {
        text.to_string()
    }
}
