//! static per-token configuration
//!
//! closed set of three tokens, each with decimals, a minimum stake, a
//! minimum transfer-out threshold, and the transfer backend's deposit
//! fee percentage. all amounts are in smallest units.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Token {
    Sol,
    Usd1,
    Radr,
}

impl Default for Token {
    fn default() -> Self {
        Token::Sol
    }
}

pub struct TokenTable {
    pub decimals: u32,
    pub minimum_stake: u128,
    pub minimum_transfer: u128,
    /// deposit fee percent charged by the transfer backend, as a fraction
    /// with two implied decimal places (e.g. 50 == 0.50%)
    pub deposit_fee_percent_x100: u32,
}

impl Token {
    pub fn table(self) -> TokenTable {
        match self {
            Token::Sol => TokenTable {
                decimals: 9,
                minimum_stake: 10_000_000,       // 0.01 SOL
                minimum_transfer: 100_000_000,   // 0.1 SOL
                deposit_fee_percent_x100: 50,    // 0.5%
            },
            Token::Usd1 => TokenTable {
                decimals: 6,
                minimum_stake: 1_000_000,        // 1 USD1
                minimum_transfer: 5_000_000,      // 5 USD1
                deposit_fee_percent_x100: 25,     // 0.25%
            },
            Token::Radr => TokenTable {
                decimals: 9,
                minimum_stake: 100_000_000,       // 0.1 RADR
                minimum_transfer: 1_000_000_000,  // 1 RADR
                deposit_fee_percent_x100: 100,    // 1%
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Token::Sol => "SOL",
            Token::Usd1 => "USD1",
            Token::Radr => "RADR",
        }
    }

    pub fn parse(s: &str) -> Option<Token> {
        match s.to_uppercase().as_str() {
            "SOL" => Some(Token::Sol),
            "USD1" => Some(Token::Usd1),
            "RADR" => Some(Token::Radr),
            _ => None,
        }
    }

    /// convert a human-unit amount (e.g. 0.1 SOL) to smallest units
    pub fn to_smallest_unit(self, human_amount: f64) -> u128 {
        let scale = 10f64.powi(self.table().decimals as i32);
        (human_amount * scale).round() as u128
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for t in [Token::Sol, Token::Usd1, Token::Radr] {
            assert_eq!(Token::parse(t.as_str()), Some(t));
        }
        assert_eq!(Token::parse("unknown"), None);
    }

    #[test]
    fn test_to_smallest_unit() {
        assert_eq!(Token::Sol.to_smallest_unit(0.1), 100_000_000);
        assert_eq!(Token::Sol.to_smallest_unit(0.11), 110_000_000);
    }
}
