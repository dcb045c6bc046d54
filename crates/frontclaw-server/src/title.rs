//! Conversation title derivation.
//!
//! A title is cut from the first prompt: code fences, markdown markup, and
//! URLs stripped, whitespace collapsed, preferring the first sentence of at
//! least [`MIN_SENTENCE_LEN`] characters, capped at [`MAX_TITLE_LEN`].

pub const MAX_TITLE_LEN: usize = 150;
pub const MIN_SENTENCE_LEN: usize = 8;

fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn strip_urls(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| !word.starts_with("http://") && !word.starts_with("https://"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove inline markdown markers, turning `[text](url)` into `text`.
fn strip_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = text[i..].chars().next().expect("in-bounds char");
        match c {
            '#' | '*' | '_' | '`' | '>' | '[' => i += c.len_utf8(),
            ']' => {
                i += 1;
                // `](target)`: drop the link target entirely.
                if bytes.get(i) == Some(&b'(') {
                    while i < bytes.len() && bytes[i] != b')' {
                        i += 1;
                    }
                    if i < bytes.len() {
                        i += 1;
                    }
                }
            }
            c => {
                out.push(c);
                i += c.len_utf8();
            }
        }
    }
    out
}

/// The prefix up to the first sentence terminator that yields at least
/// [`MIN_SENTENCE_LEN`] characters.
fn first_sentence(text: &str) -> Option<&str> {
    for (idx, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let candidate = text[..idx].trim();
            if candidate.chars().count() >= MIN_SENTENCE_LEN {
                return Some(candidate);
            }
        }
    }
    None
}

fn cut(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

/// Derive a display title from the first prompt of a conversation.
pub fn derive_title(prompt: &str) -> String {
    let no_fences = strip_code_fences(prompt);
    let no_markdown = strip_markdown(&no_fences);
    let cleaned = strip_urls(&no_markdown);
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return "New conversation".to_string();
    }

    match first_sentence(&collapsed) {
        Some(sentence) => cut(sentence, MAX_TITLE_LEN),
        None => cut(collapsed.trim(), MAX_TITLE_LEN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_short_prompt_is_its_own_title() {
        assert_eq!(derive_title("Plan my trip to Lisbon"), "Plan my trip to Lisbon");
    }

    #[test]
    fn first_long_enough_sentence_wins() {
        let title = derive_title("Hi. Can you review this pull request for me? Thanks!");
        assert_eq!(title, "Hi. Can you review this pull request for me");
    }

    #[test]
    fn code_fences_are_dropped() {
        let prompt = "Fix this\n```rust\nfn broken() {}\n```\nplease";
        assert_eq!(derive_title(prompt), "Fix this please");
    }

    #[test]
    fn urls_are_dropped() {
        let title = derive_title("Summarize https://example.com/a/very/long/link for me");
        assert_eq!(title, "Summarize for me");
    }

    #[test]
    fn markdown_markup_is_stripped() {
        assert_eq!(derive_title("# Heading with **bold** text"), "Heading with bold text");
        assert_eq!(derive_title("see [the docs](https://docs.rs)"), "see the docs");
    }

    #[test]
    fn long_prompts_are_capped() {
        let prompt = "word ".repeat(100);
        let title = derive_title(&prompt);
        assert!(title.chars().count() <= MAX_TITLE_LEN);
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(derive_title("too   many\n\nspaces"), "too many spaces");
    }

    #[test]
    fn empty_prompt_gets_a_fallback() {
        assert_eq!(derive_title("```\ncode only\n```"), "New conversation");
    }
}
