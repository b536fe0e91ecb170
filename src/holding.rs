use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// Currency assumed for tickers without an exchange or pair suffix.
pub const DEFAULT_CURRENCY: &str = "USD";

const EXCHANGE_SUFFIXES: [(&str, &str); 6] = [
    (".AX", "AUD"),
    (".L", "GBP"),
    (".TO", "CAD"),
    (".NZ", "NZD"),
    (".HK", "HKD"),
    (".T", "JPY"),
];

/// One portfolio position. Identity is the ticker.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Holding {
    pub ticker: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub quantity: Decimal,
    /// Average entry price, in the account currency.
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub average_cost: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

impl Holding {
    pub fn new(ticker: &str, quantity: Decimal, average_cost: Decimal) -> Self {
        Self {
            ticker: normalize_ticker(ticker),
            quantity,
            average_cost,
            currency: None,
            notes: String::new(),
        }
    }

    /// Upper-case ticker and currency, trimmed notes.
    pub fn normalized(self) -> Self {
        Self {
            ticker: normalize_ticker(&self.ticker),
            currency: self.currency.as_deref().and_then(normalize_currency),
            notes: self.notes.trim().to_string(),
            ..self
        }
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = normalize_currency(currency);
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = notes.trim().to_string();
        self
    }

    /// Listing currency for ASX tickers, otherwise the explicit currency if
    /// set, otherwise the one implied by the ticker suffix.
    pub fn currency(&self) -> String {
        pinned_currency(&self.ticker)
            .map(str::to_string)
            .or_else(|| self.currency.clone())
            .unwrap_or_else(|| currency_from_ticker(&self.ticker))
    }

    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.average_cost
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.ticker.is_empty() {
            return Err("Ticker is empty".to_string());
        }
        if self.ticker.chars().any(char::is_whitespace) {
            return Err(format!("Ticker {:?} contains whitespace", self.ticker));
        }
        if self.quantity < dec!(0) {
            return Err(format!("Negative quantity for {}", self.ticker));
        }
        if self.average_cost < dec!(0) {
            return Err(format!("Negative average cost for {}", self.ticker));
        }
        Ok(())
    }
}

pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

pub fn normalize_currency(currency: &str) -> Option<String> {
    let currency = currency.trim().to_uppercase();
    if currency.is_empty() {
        None
    } else {
        Some(currency)
    }
}

/// ASX listings are always priced in AUD, whatever the holding or the
/// provider says.
pub fn pinned_currency(ticker: &str) -> Option<&'static str> {
    if normalize_ticker(ticker).ends_with(".AX") {
        Some("AUD")
    } else {
        None
    }
}

/// Currency implied by a ticker: exchange suffix (`NDQ.AX`), crypto pair
/// (`BTC-USD`), otherwise USD.
pub fn currency_from_ticker(ticker: &str) -> String {
    let ticker = normalize_ticker(ticker);
    if let Some((_, currency)) = EXCHANGE_SUFFIXES
        .iter()
        .find(|(suffix, _)| ticker.ends_with(suffix))
    {
        return currency.to_string();
    }
    match ticker.rsplit_once('-') {
        Some((base, quote))
            if !base.is_empty()
                && quote.len() == 3
                && quote.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            quote.to_string()
        }
        _ => DEFAULT_CURRENCY.to_string(),
    }
}

/// Parses an input line `TICKER QUANTITY AVG_COST [@CCY] [NOTES...]`.
impl TryFrom<&str> for Holding {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut parts = value.split_whitespace().peekable();
        let ticker = parts.next().ok_or("Missing ticker")?;
        let quantity = parts.next().ok_or("Missing quantity")?;
        let average_cost = parts.next().ok_or("Missing average cost")?;
        let currency = parts.next_if(|part| part.starts_with('@'));
        let notes = parts.collect::<Vec<&str>>().join(" ");

        let quantity = Decimal::from_str(quantity)
            .map_err(|e| format!("Invalid quantity {:?}: {}", quantity, e))?;
        let average_cost = Decimal::from_str(average_cost)
            .map_err(|e| format!("Invalid average cost {:?}: {}", average_cost, e))?;

        let mut holding = Holding::new(ticker, quantity, average_cost).with_notes(&notes);
        if let Some(currency) = currency {
            let currency = &currency[1..];
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(format!("Invalid currency {:?}", currency));
            }
            holding = holding.with_currency(currency);
        }
        holding.validate()?;
        Ok(holding)
    }
}

impl Display for Holding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.ticker, self.quantity, self.average_cost)?;
        if let Some(currency) = &self.currency {
            write!(f, " @{}", currency)?;
        }
        if !self.notes.is_empty() {
            write!(f, " {}", self.notes)?;
        }
        Ok(())
    }
}
