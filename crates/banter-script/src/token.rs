//! Quote-aware whitespace tokenizer.
//!
//! Splitting rules, preserved exactly because command parsers depend on them:
//! tokens split on runs of whitespace; a `"…"` or `'…'` span keeps its
//! whitespace and loses its quote characters; backslash escapes the next
//! character in unquoted text only. Inside a quoted span there is NO escape
//! processing: a backslash is a literal character and a quote of the same
//! kind always closes the span. Unterminated quotes run to end of input.

/// Split `input` into tokens.
///
/// An empty quoted pair (`""`) contributes nothing, so it never produces an
/// empty token, while `" "` produces a single-space token.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if let Some(quote) = in_quote {
            if c == quote {
                in_quote = None;
            } else {
                current.push(c);
            }
            continue;
        }
        match c {
            '\\' => {
                // Escape applies outside quotes only. A trailing backslash
                // with nothing after it is dropped.
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' | '\'' => in_quote = Some(c),
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
