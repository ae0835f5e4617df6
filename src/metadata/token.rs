//! Metadata tokens.
//!
//! A token is a 32-bit value whose high byte names a metadata table and whose low
//! 24 bits name a 1-based row in it (ECMA-335 II.22). User strings use the
//! pseudo-table `0x70` with a `#US` heap offset instead of a row.
//!
//! Tokens identify rows of one particular image. The object graph keeps the token
//! each entity was read from for diagnostics only; the writer assigns fresh ones.

use std::fmt;

/// A metadata token (table byte + 24-bit row).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

/// Table byte of user string tokens (`ldstr`)
pub const USER_STRING_TABLE: u8 = 0x70;

impl Token {
    /// Wrap a raw value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Build a token from a table byte and a 1-based row.
    #[must_use]
    pub const fn from_parts(table: u8, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// The raw value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// The table byte.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The 1-based row (or heap offset for user strings).
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// A token with row 0 refers to nothing.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.row() == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_parts() {
        let token = Token::new(0x0600_0001);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.row(), 1);
        assert!(!token.is_null());

        assert_eq!(Token::from_parts(0x02, 5), Token(0x0200_0005));
        assert_eq!(Token::from_parts(0x1B, 0x0100_0001).row(), 1);
        assert!(Token(0x0100_0000).is_null());
    }

    #[test]
    fn token_conversions() {
        let token: Token = 0x0A00_0010_u32.into();
        let raw: u32 = token.into();
        assert_eq!(raw, 0x0A00_0010);
    }

    #[test]
    fn token_formatting() {
        let token = Token(0x0600_0001);
        assert_eq!(format!("{}", token), "0x06000001");

        let debug_str = format!("{:?}", token);
        assert!(debug_str.contains("Token(0x06000001"));
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }
}
