//! Extraction of the file payload from a free-text coder answer.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n`]*\n(.*?)```").unwrap());

/// Return the first fenced code block of `answer`, or the trimmed answer when
/// it has none.
pub fn extract_code(answer: &str) -> String {
    match FENCE_RE.captures(answer).and_then(|caps| caps.get(1)) {
        Some(block) => block.as_str().to_string(),
        None => {
            let mut trimmed = answer.trim().to_string();
            trimmed.push('\n');
            trimmed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fenced_block_is_extracted() {
        let answer = "Here you go:\n```python\nprint('a')\n```\nand also\n```\nother\n```\n";
        assert_eq!(extract_code(answer), "print('a')\n");
    }

    #[test]
    fn answer_without_fence_is_used_whole() {
        assert_eq!(extract_code("  fn main() {}\n\n"), "fn main() {}\n");
    }

    #[test]
    fn unterminated_fence_falls_back_to_whole_answer() {
        assert_eq!(extract_code("```rust\nfn a() {}"), "```rust\nfn a() {}\n");
    }
}
