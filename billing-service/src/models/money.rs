//! Currency primitives.
//!
//! All monetary amounts in this service are integers in minor units (cents).
//! Currency governs display formatting only; it never affects arithmetic or
//! comparison.

use serde::{Deserialize, Serialize};

/// Supported settlement currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Brl,
    Usd,
    Eur,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Brl => "BRL",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "USD" => Currency::Usd,
            "EUR" => Currency::Eur,
            _ => Currency::Brl,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Brl => "R$",
            Currency::Usd => "$",
            Currency::Eur => "€",
        }
    }

    /// Format an amount in minor units for display.
    pub fn format_minor(&self, amount_cents: i64) -> String {
        let units = amount_cents / 100;
        let cents = (amount_cents % 100).abs();
        match self {
            Currency::Brl => format!("R$ {},{:02}", units, cents),
            Currency::Usd => format!("${}.{:02}", units, cents),
            Currency::Eur => format!("€{},{:02}", units, cents),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_strings() {
        for currency in [Currency::Brl, Currency::Usd, Currency::Eur] {
            assert_eq!(Currency::from_string(currency.as_str()), currency);
        }
    }

    #[test]
    fn unknown_currency_defaults_to_brl() {
        assert_eq!(Currency::from_string("JPY"), Currency::Brl);
    }

    #[test]
    fn formats_minor_units() {
        assert_eq!(Currency::Brl.format_minor(4990), "R$ 49,90");
        assert_eq!(Currency::Usd.format_minor(4990), "$49.90");
        assert_eq!(Currency::Eur.format_minor(100), "€1,00");
        assert_eq!(Currency::Usd.format_minor(5), "$0.05");
    }
}
