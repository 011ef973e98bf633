//! The `submitBatch` request body and its resolution into prompt items.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::prompt::PromptItem;
use crate::types::ItemIndex;

/// Body of `POST /api/generateBatch`.
///
/// When `indices` is present, `indices[i]` is the identity reported for
/// `prompts[i]` (a retry); otherwise positions `0..N-1` are used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub prompts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<Vec<ItemIndex>>,
}

impl BatchRequest {
    pub fn fresh(prompts: Vec<String>) -> Self {
        Self {
            prompts,
            indices: None,
        }
    }

    pub fn retry(prompts: Vec<String>, indices: Vec<ItemIndex>) -> Self {
        Self {
            prompts,
            indices: Some(indices),
        }
    }

    /// A request without explicit indices starts a new batch.
    pub fn is_fresh(&self) -> bool {
        self.indices.is_none()
    }

    /// Validate the request and pair every prompt with its index, in
    /// request order. Prompt text is trimmed.
    pub fn into_items(self) -> Result<Vec<PromptItem>, CoreError> {
        if self.prompts.is_empty() {
            return Err(CoreError::Validation("No prompts provided".to_string()));
        }

        let indices = match self.indices {
            None => (0..self.prompts.len()).collect::<Vec<_>>(),
            Some(indices) => {
                if indices.len() != self.prompts.len() {
                    return Err(CoreError::Validation(format!(
                        "Got {} prompts but {} indices",
                        self.prompts.len(),
                        indices.len()
                    )));
                }
                let mut seen = HashSet::with_capacity(indices.len());
                if let Some(dup) = indices.iter().find(|i| !seen.insert(**i)) {
                    return Err(CoreError::Validation(format!("Duplicate index {dup}")));
                }
                indices
            }
        };

        Ok(self
            .prompts
            .into_iter()
            .zip(indices)
            .map(|(text, index)| PromptItem::new(index, text.trim()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn fresh_request_uses_positions() {
        let items = BatchRequest::fresh(vec![" A ".into(), "B".into()])
            .into_items()
            .unwrap();
        assert_eq!(items, vec![PromptItem::new(0, "A"), PromptItem::new(1, "B")]);
    }

    #[test]
    fn retry_request_keeps_caller_indices_in_order() {
        let items = BatchRequest::retry(vec!["C".into(), "A".into()], vec![4, 0])
            .into_items()
            .unwrap();
        assert_eq!(items, vec![PromptItem::new(4, "C"), PromptItem::new(0, "A")]);
    }

    #[test]
    fn empty_prompt_list_is_rejected() {
        assert_matches!(
            BatchRequest::fresh(vec![]).into_items(),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn mismatched_indices_are_rejected() {
        assert_matches!(
            BatchRequest::retry(vec!["A".into()], vec![0, 1]).into_items(),
            Err(CoreError::Validation(msg)) if msg.contains("1 prompts but 2 indices")
        );
    }

    #[test]
    fn duplicate_indices_are_rejected() {
        assert_matches!(
            BatchRequest::retry(vec!["A".into(), "B".into()], vec![2, 2]).into_items(),
            Err(CoreError::Validation(msg)) if msg.contains("Duplicate index 2")
        );
    }

    #[test]
    fn indices_are_omitted_from_fresh_json() {
        let json = serde_json::to_value(BatchRequest::fresh(vec!["A".into()])).unwrap();
        assert_eq!(json, serde_json::json!({"prompts": ["A"]}));
    }
}
