//! Text utilities for prompts and pattern matching.
//!
//! Provides escaping of user-controlled text before embedding it in LLM
//! prompts, Turkish-aware case folding, and the tokenization shared by the
//! lexical scorers.

/// Strip ANSI escape sequences from input.
///
/// Used before printing provider-supplied titles to a terminal.
pub fn strip_ansi_escapes(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\x1b' {
            result.push(ch);
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                // CSI: parameters until a final byte in 0x40..=0x7E
                for c in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                // OSC: until BEL or ESC \
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    result
}

/// Escape and truncate user input for safe inclusion in an LLM prompt.
///
/// - Removes ANSI escape sequences
/// - Truncates to `max_len` characters (by char count, not bytes)
/// - Replaces `<` and `>` with entities to prevent XML-tag injection
/// - Strips control characters except `\n` and `\t`
pub fn escape_for_llm_prompt(input: &str, max_len: usize) -> String {
    let cleaned = strip_ansi_escapes(input);
    let mut result = String::with_capacity(cleaned.len().min(max_len));
    for ch in cleaned.chars().take(max_len) {
        match ch {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            c if c.is_control() && c != '\n' && c != '\t' => {}
            c => result.push(c),
        }
    }
    result
}

/// Lowercase with Turkish dotted/dotless I rules.
///
/// `str::to_lowercase` maps `İ` to `i` plus a combining dot, which breaks
/// substring matching against patterns written in plain lowercase.
pub fn turkish_lowercase(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            'İ' => result.push('i'),
            'I' => result.push('ı'),
            c => result.extend(c.to_lowercase()),
        }
    }
    result
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into lowercase alphanumeric word tokens of at least `min_len` chars.
pub fn word_tokens(input: &str, min_len: usize) -> Vec<String> {
    turkish_lowercase(input)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= min_len)
        .map(str::to_string)
        .collect()
}
