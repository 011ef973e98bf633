//! Prompt items and prompt-file parsing.
//!
//! A prompt file is a sequence of blocks separated by blank lines. The
//! first line of a block is its title; any following lines are the
//! description. A block becomes the prompt `"{title}: {description}"`, or
//! just the title when there is no description.

use serde::{Deserialize, Serialize};

use crate::types::ItemIndex;

/// One prompt and its stable index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptItem {
    pub index: ItemIndex,
    pub text: String,
}

impl PromptItem {
    pub fn new(index: ItemIndex, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// A block parsed out of a prompt file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPrompt {
    pub title: String,
    pub prompt: String,
}

/// Split prompt-file text into prompts.
///
/// Whitespace-only lines separate blocks; empty blocks are dropped.
pub fn parse_prompts(text: &str) -> Vec<ParsedPrompt> {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
        .into_iter()
        .map(|lines| {
            let title = lines[0].trim().to_string();
            let description = lines[1..].join("\n").trim().to_string();
            let prompt = if description.is_empty() {
                title.clone()
            } else {
                format!("{title}: {description}")
            };
            ParsedPrompt { title, prompt }
        })
        .collect()
}

/// Turn parsed prompts into items indexed `0..N-1`.
pub fn into_items(parsed: &[ParsedPrompt]) -> Vec<PromptItem> {
    parsed
        .iter()
        .enumerate()
        .map(|(index, p)| PromptItem::new(index, p.prompt.clone()))
        .collect()
}
