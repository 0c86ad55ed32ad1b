//! Command extraction from formula step descriptions.
//!
//! Step descriptions are prose with fenced code blocks. Blocks tagged `bash`
//! or `sh` are the executable payload; everything else is ignored.
//!
//! Fence matching is deliberately naive: once a block is open, the next line
//! containing a triple backtick closes it, even when that backtick sequence
//! sits inside a quoted string. A block that is never closed is dropped.

use regex::Regex;
use std::sync::LazyLock;

/// Placeholder replaced with the town root in extracted commands.
pub const TOWN_ROOT_PLACEHOLDER: &str = "{{town_root}}";

/// Language tags whose blocks are executed.
pub const SHELL_TAGS: [&str; 2] = ["bash", "sh"];

const FENCE: &str = "```";

static FENCE_OPEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```([^\s`]*)$").unwrap());

/// A closed fenced block found in a description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// Language tag following the opening fence; empty when untagged.
    pub tag: String,
    /// Lines between the fences joined with `\n`, untouched.
    pub content: String,
}

impl FencedBlock {
    pub fn is_shell(&self) -> bool {
        SHELL_TAGS.contains(&self.tag.as_str())
    }
}

/// Find every closed fenced block in `description`, in order of appearance.
pub fn extract_fenced_blocks(description: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(String, Vec<&str>)> = None;

    for line in description.lines() {
        match open.take() {
            Some((tag, lines)) => {
                if line.contains(FENCE) {
                    blocks.push(FencedBlock {
                        tag,
                        content: lines.join("\n"),
                    });
                } else {
                    let mut lines = lines;
                    lines.push(line);
                    open = Some((tag, lines));
                }
            }
            None => {
                if let Some(cap) = FENCE_OPEN_REGEX.captures(line.trim()) {
                    let tag = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
                    open = Some((tag.to_string(), Vec::new()));
                }
            }
        }
    }

    // Anything still open here never saw its closing fence.
    blocks
}

/// Extract the shell commands embedded in a step description.
///
/// Each surviving `bash`/`sh` block becomes exactly one command string with
/// every `{{town_root}}` replaced by `town_root` verbatim. Comment-only
/// blocks are skipped.
pub fn extract_commands(description: &str, town_root: &str) -> Vec<String> {
    extract_fenced_blocks(description)
        .into_iter()
        .filter(|block| block.is_shell() && !is_comment_only(&block.content))
        .map(|block| block.content.replace(TOWN_ROOT_PLACEHOLDER, town_root))
        .collect()
}

/// True when every line of `block` is blank or a `#` comment.
///
/// The empty string counts as comment-only.
pub fn is_comment_only(block: &str) -> bool {
    block.lines().all(|line| {
        let trimmed = line.trim();
        trimmed.is_empty() || trimmed.starts_with('#')
    })
}
