//! Core identifier types for correlation.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of random characters in a generated [`Token`].
const TOKEN_LEN: usize = 12;

/// Opaque correlation identifier.
///
/// A token names one request/reply conversation (or one multipart/stream
/// transfer). The requester mints it; the responder echoes it back as the
/// reply's message id. Tokens travel on the wire as a short alphanumeric
/// atom, so they must never contain whitespace.
///
/// # Examples
///
/// ```
/// use weft::Token;
///
/// let a = Token::random();
/// let b = Token::random();
/// assert_ne!(a, b);
///
/// let fixed = Token::from_text("t-1");
/// assert_eq!(fixed.as_str(), "t-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(String);

impl Token {
    /// Mint a fresh random token.
    pub fn random() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Build a token from existing text (e.g. an unpacked wire atom).
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The token's textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
