//! Text token to display piece mapping.

use crate::frame::TextToken;
use anyhow::{anyhow, Result};
use std::path::Path;
use tokenizers::Tokenizer;

/// Maps text token ids to the pieces shown in logs.
///
/// Without a tokenizer file, ids are rendered as `<id>`.
pub struct TextTokenizer {
    tokenizer: Option<Tokenizer>,
}

impl TextTokenizer {
    pub fn new(path: Option<&Path>) -> Result<Self> {
        let tokenizer = match path {
            Some(path) => Some(
                Tokenizer::from_file(path)
                    .map_err(|e| anyhow!("failed to load text tokenizer {:?}: {}", path, e))?,
            ),
            None => None,
        };
        Ok(Self { tokenizer })
    }

    pub fn raw() -> Self {
        Self { tokenizer: None }
    }

    /// Display piece for one token; sentencepiece word markers become spaces.
    pub fn piece(&self, token: TextToken) -> String {
        self.tokenizer
            .as_ref()
            .and_then(|t| t.id_to_token(token.0))
            .map(|piece| piece.replace('▁', " "))
            .unwrap_or_else(|| format!("<{}>", token.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_pieces_show_ids() {
        let tokenizer = TextTokenizer::raw();
        assert_eq!(tokenizer.piece(TextToken(42)), "<42>");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(TextTokenizer::new(Some(Path::new("/nonexistent/tokenizer.json"))).is_err());
        assert!(TextTokenizer::new(None).is_ok());
    }
}
