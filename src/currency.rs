//! Denominations and canonical currency codes.
//!
//! Every denomination the classifier can emit is a variant of
//! [`Denomination`]; the label/code/face-value table is an exhaustive
//! `match`, so adding a variant without a code is a compile error.
//!
//! Coin codes carry the value in minor units (`NIS_C_10` = 10 agorot),
//! bill codes in major units (`EUR_B_5` = 5 euro).

use std::fmt;

use crate::types::UNKNOWN_LABEL;

// ---------------------------------------------------------------------------
// Currency family
// ---------------------------------------------------------------------------

/// The currency a denomination belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    Nis,
    Euro,
    Usd,
}

impl Family {
    /// Three-letter code used in canonical denomination codes.
    pub fn code(self) -> &'static str {
        match self {
            Family::Nis => "NIS",
            Family::Euro => "EUR",
            Family::Usd => "USD",
        }
    }

    /// ISO 4217 code the rate provider uses.
    pub fn iso_code(self) -> &'static str {
        match self {
            Family::Nis => "ILS",
            Family::Euro => "EUR",
            Family::Usd => "USD",
        }
    }

    /// Parse the currency token of a classifier label ("NIS", "Euro", "USD").
    pub fn from_label_token(token: &str) -> Option<Family> {
        match token {
            "NIS" => Some(Family::Nis),
            "Euro" => Some(Family::Euro),
            "USD" => Some(Family::Usd),
            _ => None,
        }
    }

    /// Family of a full classifier label, taken from its second
    /// whitespace-delimited token.
    pub fn from_label(label: &str) -> Option<Family> {
        label.split_whitespace().nth(1).and_then(Family::from_label_token)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Map a caller-facing currency code to the code the rate provider speaks.
/// `NIS` is an alias for `ILS`; everything else is upper-cased as is.
pub fn rate_currency_code(code: &str) -> String {
    let upper = code.trim().to_ascii_uppercase();
    if upper == "NIS" {
        "ILS".to_string()
    } else {
        upper
    }
}

// ---------------------------------------------------------------------------
// Denomination
// ---------------------------------------------------------------------------

/// Every coin and bill the classifier knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Denomination {
    Nis10Agorot,
    Nis50Agorot,
    Nis1,
    Nis2,
    Nis5,
    Nis10,
    Nis20,
    Nis50,
    Nis100,
    Nis200,

    Euro1Cent,
    Euro2Cent,
    Euro5Cent,
    Euro10Cent,
    Euro20Cent,
    Euro50Cent,
    Euro1,
    Euro2,
    Euro5,
    Euro10,
    Euro20,
    Euro50,
    Euro100,
    Euro200,
    Euro500,

    Usd1Cent,
    Usd5Cent,
    Usd10Cent,
    Usd25Cent,
    Usd50Cent,
    Usd1Coin,
    Usd1Bill,
    Usd2,
    Usd5,
    Usd10,
    Usd20,
    Usd50,
    Usd100,
}

impl Denomination {
    pub const ALL: [Denomination; 38] = [
        Denomination::Nis10Agorot,
        Denomination::Nis50Agorot,
        Denomination::Nis1,
        Denomination::Nis2,
        Denomination::Nis5,
        Denomination::Nis10,
        Denomination::Nis20,
        Denomination::Nis50,
        Denomination::Nis100,
        Denomination::Nis200,
        Denomination::Euro1Cent,
        Denomination::Euro2Cent,
        Denomination::Euro5Cent,
        Denomination::Euro10Cent,
        Denomination::Euro20Cent,
        Denomination::Euro50Cent,
        Denomination::Euro1,
        Denomination::Euro2,
        Denomination::Euro5,
        Denomination::Euro10,
        Denomination::Euro20,
        Denomination::Euro50,
        Denomination::Euro100,
        Denomination::Euro200,
        Denomination::Euro500,
        Denomination::Usd1Cent,
        Denomination::Usd5Cent,
        Denomination::Usd10Cent,
        Denomination::Usd25Cent,
        Denomination::Usd50Cent,
        Denomination::Usd1Coin,
        Denomination::Usd1Bill,
        Denomination::Usd2,
        Denomination::Usd5,
        Denomination::Usd10,
        Denomination::Usd20,
        Denomination::Usd50,
        Denomination::Usd100,
    ];

    /// `(classifier label, canonical code)`.
    fn table(self) -> (&'static str, &'static str) {
        use Denomination::*;
        match self {
            Nis10Agorot => ("0.1 NIS", "NIS_C_10"),
            Nis50Agorot => ("0.5 NIS", "NIS_C_50"),
            Nis1 => ("1 NIS", "NIS_C_100"),
            Nis2 => ("2 NIS", "NIS_C_200"),
            Nis5 => ("5 NIS", "NIS_C_500"),
            Nis10 => ("10 NIS", "NIS_C_1000"),
            Nis20 => ("20 NIS", "NIS_B_20"),
            Nis50 => ("50 NIS", "NIS_B_50"),
            Nis100 => ("100 NIS", "NIS_B_100"),
            Nis200 => ("200 NIS", "NIS_B_200"),

            Euro1Cent => ("0.01 Euro", "EUR_C_1"),
            Euro2Cent => ("0.02 Euro", "EUR_C_2"),
            Euro5Cent => ("0.05 Euro", "EUR_C_5"),
            Euro10Cent => ("0.1 Euro", "EUR_C_10"),
            Euro20Cent => ("0.2 Euro", "EUR_C_20"),
            Euro50Cent => ("0.5 Euro", "EUR_C_50"),
            Euro1 => ("1 Euro", "EUR_C_100"),
            Euro2 => ("2 Euro", "EUR_C_200"),
            Euro5 => ("5 Euro", "EUR_B_5"),
            Euro10 => ("10 Euro", "EUR_B_10"),
            Euro20 => ("20 Euro", "EUR_B_20"),
            Euro50 => ("50 Euro", "EUR_B_50"),
            Euro100 => ("100 Euro", "EUR_B_100"),
            Euro200 => ("200 Euro", "EUR_B_200"),
            Euro500 => ("500 Euro", "EUR_B_500"),

            Usd1Cent => ("0.01 USD", "USD_C_1"),
            Usd5Cent => ("0.05 USD", "USD_C_5"),
            Usd10Cent => ("0.1 USD", "USD_C_10"),
            Usd25Cent => ("0.25 USD", "USD_C_25"),
            Usd50Cent => ("0.5 USD", "USD_C_50"),
            Usd1Coin => ("1 USD COIN", "USD_C_100"),
            Usd1Bill => ("1 USD BILL", "USD_B_1"),
            Usd2 => ("2 USD", "USD_B_2"),
            Usd5 => ("5 USD", "USD_B_5"),
            Usd10 => ("10 USD", "USD_B_10"),
            Usd20 => ("20 USD", "USD_B_20"),
            Usd50 => ("50 USD", "USD_B_50"),
            Usd100 => ("100 USD", "USD_B_100"),
        }
    }

    /// The exact label the classifier emits for this denomination.
    pub fn label(self) -> &'static str {
        self.table().0
    }

    /// Canonical code, e.g. `EUR_B_5`.
    pub fn code(self) -> &'static str {
        self.table().1
    }

    pub fn family(self) -> Family {
        use Denomination::*;
        match self {
            Nis10Agorot | Nis50Agorot | Nis1 | Nis2 | Nis5 | Nis10 | Nis20 | Nis50 | Nis100
            | Nis200 => Family::Nis,
            Euro1Cent | Euro2Cent | Euro5Cent | Euro10Cent | Euro20Cent | Euro50Cent | Euro1
            | Euro2 | Euro5 | Euro10 | Euro20 | Euro50 | Euro100 | Euro200 | Euro500 => Family::Euro,
            Usd1Cent | Usd5Cent | Usd10Cent | Usd25Cent | Usd50Cent | Usd1Coin | Usd1Bill | Usd2
            | Usd5 | Usd10 | Usd20 | Usd50 | Usd100 => Family::Usd,
        }
    }

    /// Face value in the denomination's own currency: the number that
    /// leads the classifier label.
    pub fn face_value(self) -> f64 {
        self.label()
            .split_whitespace()
            .next()
            .and_then(|n| n.parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    pub fn is_coin(self) -> bool {
        self.code().contains("_C_")
    }

    /// Look up a denomination by its exact classifier label.
    pub fn from_label(label: &str) -> Option<Denomination> {
        Self::ALL.iter().copied().find(|d| d.label() == label)
    }

    /// Look up a denomination by canonical code.
    pub fn from_code(code: &str) -> Option<Denomination> {
        Self::ALL.iter().copied().find(|d| d.code() == code)
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Currency key
// ---------------------------------------------------------------------------

/// Key of a [`crate::types::CurrencyCount`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CurrencyKey {
    Denomination(Denomination),
    Unknown,
}

impl CurrencyKey {
    /// Canonical code, or `"Unknown"`.
    pub fn code(&self) -> &'static str {
        match self {
            CurrencyKey::Denomination(d) => d.code(),
            CurrencyKey::Unknown => UNKNOWN_LABEL,
        }
    }

    pub fn family(&self) -> Option<Family> {
        match self {
            CurrencyKey::Denomination(d) => Some(d.family()),
            CurrencyKey::Unknown => None,
        }
    }
}

impl From<Denomination> for CurrencyKey {
    fn from(d: Denomination) -> Self {
        CurrencyKey::Denomination(d)
    }
}

impl fmt::Display for CurrencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
