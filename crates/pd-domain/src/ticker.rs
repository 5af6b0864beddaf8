//! Equity ticker symbol.

use std::fmt;

use crate::error::DomainError;

/// An equity ticker: 1–5 uppercase ASCII letters.
///
/// Equality, ordering, and hashing are all plain string semantics. The
/// symbol is validated once at construction; everything downstream can
/// treat it as well-formed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticker(String);

impl Ticker {
    /// Validate and construct a ticker symbol.
    pub fn new(symbol: impl AsRef<str>) -> Result<Self, DomainError> {
        let s = symbol.as_ref();
        let ok = !s.is_empty() && s.len() <= 5 && s.bytes().all(|b| b.is_ascii_uppercase());
        if !ok {
            return Err(DomainError::InvalidTicker { raw: s.to_string() });
        }
        Ok(Ticker(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_one_to_five_uppercase_letters() {
        for sym in ["A", "GE", "AAPL", "GOOGL"] {
            assert_eq!(Ticker::new(sym).unwrap().as_str(), sym);
        }
    }

    #[test]
    fn rejects_malformed_symbols() {
        for sym in ["", "aapl", "TOOLONG", "BRK.B", "AB1", " AAPL"] {
            assert!(Ticker::new(sym).is_err(), "should reject {sym:?}");
        }
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = Ticker::new("AAPL").unwrap();
        let m = Ticker::new("MSFT").unwrap();
        assert!(a < m);
    }
}
