use std::{collections::HashSet, path::Path};

use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    holding::{normalize_currency, normalize_ticker, Holding},
    utils::decimal_from_value,
};

pub const DEFAULT_TICKERS: [&str; 16] = [
    "NDQ.AX", "VGS.AX", "A200.AX", "FANG.AX", "CRYP.AX", "HACK.AX", "ROBO.AX", "GGUS.AX",
    "GEAR.AX", "ZIP.AX", "BNR.AX", "IVZ.AX", "BTC-USD", "ETH-USD", "EBTC.AX", "ETHT.AX",
];

#[derive(Debug, thiserror::Error)]
pub enum HoldingsError {
    #[error("Invalid holdings file: {0}")]
    Format(String),
    #[error("Holding {0} already exists")]
    Duplicate(String),
    #[error("Holding {0} not found")]
    NotFound(String),
    #[error("Holdings file error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for HoldingsError {
    fn from(err: serde_json::Error) -> Self {
        HoldingsError::Format(err.to_string())
    }
}

/// In-memory holdings of the session, in file order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HoldingsStore {
    holdings: Vec<Holding>,
}

/// One row as found in a holdings file. Accepts the legacy column names.
#[derive(Deserialize, Debug, Default)]
struct RawHolding {
    #[serde(default, alias = "Ticker")]
    ticker: Option<Value>,
    #[serde(default, alias = "Quantity")]
    quantity: Option<Value>,
    #[serde(default, alias = "CostBasis_AUD", alias = "cost_basis")]
    average_cost: Option<Value>,
    #[serde(default, alias = "Currency")]
    currency: Option<String>,
    #[serde(default, alias = "Notes")]
    notes: Option<String>,
}

impl RawHolding {
    /// `None` for rows without a ticker, which are dropped on import.
    fn into_holding(self) -> Result<Option<Holding>, HoldingsError> {
        let ticker = match self.ticker {
            Some(Value::String(s)) => normalize_ticker(&s),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => {
                return Err(HoldingsError::Format(format!("Invalid ticker {}", other)));
            }
        };
        if ticker.is_empty() {
            return Ok(None);
        }

        let field = |name: &str, value: Option<Value>| {
            decimal_from_value(&value.unwrap_or(Value::Null))
                .map(|d| d.unwrap_or(dec!(0)))
                .map_err(|e| HoldingsError::Format(format!("{} for {}: {}", name, ticker, e)))
        };
        let quantity = field("quantity", self.quantity)?;
        let average_cost = field("average_cost", self.average_cost)?;

        let holding = Holding {
            ticker: ticker.clone(),
            quantity,
            average_cost,
            currency: self.currency.as_deref().and_then(normalize_currency),
            notes: self.notes.unwrap_or_default().trim().to_string(),
        };
        holding.validate().map_err(HoldingsError::Format)?;
        Ok(Some(holding))
    }
}

impl HoldingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_holdings(holdings: Vec<Holding>) -> Result<Self, HoldingsError> {
        let mut seen = HashSet::new();
        for holding in holdings.iter() {
            holding.validate().map_err(HoldingsError::Format)?;
            if !seen.insert(holding.ticker.clone()) {
                return Err(HoldingsError::Format(format!(
                    "Duplicate ticker {}",
                    holding.ticker
                )));
            }
        }
        Ok(Self { holdings })
    }

    /// Bundled starting point: the default tickers with nothing held.
    pub fn template() -> Self {
        Self {
            holdings: DEFAULT_TICKERS
                .iter()
                .map(|ticker| Holding::new(ticker, dec!(0), dec!(0)))
                .collect(),
        }
    }

    /// Parses a holdings document, either an array of holding objects or the
    /// column-oriented `{"Ticker": [...], "Quantity": [...], ...}` layout.
    pub fn load(bytes: &[u8]) -> Result<Self, HoldingsError> {
        let document: Value = serde_json::from_slice(bytes)?;
        let rows = match document {
            Value::Array(rows) => rows,
            Value::Object(columns) => columns_to_rows(columns)?,
            other => {
                return Err(HoldingsError::Format(format!(
                    "Expected an array of holdings, got {}",
                    json_kind(&other)
                )));
            }
        };

        let mut holdings = vec![];
        for row in rows {
            if !row.is_object() {
                return Err(HoldingsError::Format(format!(
                    "Expected a holding object, got {}",
                    json_kind(&row)
                )));
            }
            let raw: RawHolding = serde_json::from_value(row)?;
            if let Some(holding) = raw.into_holding()? {
                holdings.push(holding);
            }
        }
        Self::from_holdings(holdings)
    }

    pub fn export(&self) -> Result<Vec<u8>, HoldingsError> {
        let holdings: Vec<&Holding> = self
            .holdings
            .iter()
            .filter(|holding| !holding.ticker.trim().is_empty())
            .collect();
        Ok(serde_json::to_vec_pretty(&holdings)?)
    }

    /// Reads the holdings file, failing on a missing or malformed file.
    pub async fn read_file(path: &Path) -> Result<Self, HoldingsError> {
        let bytes = tokio::fs::read(path).await?;
        Self::load(&bytes)
    }

    /// Reads the holdings file, falling back to the template.
    pub async fn load_file(path: &Path) -> Self {
        match Self::read_file(path).await {
            Ok(store) => {
                info!("Loaded {} holdings from {}", store.len(), path.display());
                store
            }
            Err(HoldingsError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("No holdings at {}, using template", path.display());
                Self::template()
            }
            Err(err) => {
                warn!("Could not load {} ({}), using template", path.display(), err);
                Self::template()
            }
        }
    }

    pub async fn save_file(&self, path: &Path) -> Result<(), HoldingsError> {
        let bytes = self.export()?;
        tokio::fs::write(path, bytes).await?;
        debug!("Saved {} holdings to {}", self.len(), path.display());
        Ok(())
    }

    pub fn add(&mut self, holding: Holding) -> Result<(), HoldingsError> {
        let holding = holding.normalized();
        holding.validate().map_err(HoldingsError::Format)?;
        if self.get(&holding.ticker).is_some() {
            return Err(HoldingsError::Duplicate(holding.ticker));
        }
        self.holdings.push(holding);
        Ok(())
    }

    /// Replaces the holding with the same ticker, returning the previous one.
    pub fn update(&mut self, holding: Holding) -> Result<Holding, HoldingsError> {
        let holding = holding.normalized();
        holding.validate().map_err(HoldingsError::Format)?;
        match self.holdings.iter_mut().find(|h| h.ticker == holding.ticker) {
            Some(existing) => Ok(std::mem::replace(existing, holding)),
            None => Err(HoldingsError::NotFound(holding.ticker)),
        }
    }

    pub fn remove(&mut self, ticker: &str) -> Result<Holding, HoldingsError> {
        let ticker = normalize_ticker(ticker);
        match self.holdings.iter().position(|h| h.ticker == ticker) {
            Some(index) => Ok(self.holdings.remove(index)),
            None => Err(HoldingsError::NotFound(ticker)),
        }
    }

    pub fn get(&self, ticker: &str) -> Option<&Holding> {
        let ticker = normalize_ticker(ticker);
        self.holdings.iter().find(|h| h.ticker == ticker)
    }

    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    pub fn snapshot(&self) -> Vec<Holding> {
        self.holdings.clone()
    }

    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }
}

fn columns_to_rows(columns: Map<String, Value>) -> Result<Vec<Value>, HoldingsError> {
    let mut len = None;
    for (name, column) in columns.iter() {
        let column_len = column
            .as_array()
            .ok_or_else(|| HoldingsError::Format(format!("Column {} is not an array", name)))?
            .len();
        match len {
            Some(len) if len != column_len => {
                return Err(HoldingsError::Format(format!(
                    "Column {} has {} rows, expected {}",
                    name, column_len, len
                )));
            }
            _ => len = Some(column_len),
        }
    }

    let rows = (0..len.unwrap_or(0))
        .map(|i| {
            let row: Map<String, Value> = columns
                .iter()
                .map(|(name, column)| (name.clone(), column[i].clone()))
                .collect();
            Value::Object(row)
        })
        .collect();
    Ok(rows)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    fn sample() -> HoldingsStore {
        HoldingsStore::from_holdings(vec![
            Holding::new("NDQ.AX", dec!(10), dec!(20.0)).with_notes("core"),
            Holding::new("BTC-USD", dec!(0.015), dec!(95000.125)),
            Holding::new("AAPL", dec!(3), dec!(310.5)).with_currency("USD"),
        ])
        .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let store = sample();
        let exported = store.export().unwrap();
        let imported = HoldingsStore::load(&exported).unwrap();
        assert_eq!(imported, store);
        assert_eq!(imported.export().unwrap(), exported);
    }

    #[test]
    fn test_round_trip_keeps_precision() {
        let quantity = Decimal::from_str("123456789.123456789").unwrap();
        let average_cost = Decimal::from_str("0.000000012345678901234").unwrap();
        let store = HoldingsStore::from_holdings(vec![Holding::new("BTC-USD", quantity, average_cost)])
            .unwrap();

        let once = HoldingsStore::load(&store.export().unwrap()).unwrap();
        assert_eq!(once, store);
        let twice = HoldingsStore::load(&once.export().unwrap()).unwrap();
        assert_eq!(twice, store);
        assert_eq!(twice.get("BTC-USD").unwrap().quantity, quantity);
        assert!(String::from_utf8(store.export().unwrap())
            .unwrap()
            .contains("123456789.123456789"));
    }

    #[test]
    fn test_export_format() {
        let store = HoldingsStore::from_holdings(vec![Holding::new("NDQ.AX", dec!(10), dec!(20.5))])
            .unwrap();
        let exported: Value = serde_json::from_slice(&store.export().unwrap()).unwrap();
        assert_eq!(
            exported,
            json!([{"ticker": "NDQ.AX", "quantity": 10, "average_cost": 20.5}])
        );
    }

    #[test]
    fn test_load_legacy_columns() {
        let json = json!({
            "Ticker": ["NDQ.AX", "BTC-USD", ""],
            "Quantity": [10, null, 1],
            "CostBasis_AUD": [20.0, 95000, 1],
            "Notes": ["core", "", ""]
        });
        let store = HoldingsStore::load(json.to_string().as_bytes()).unwrap();
        assert_eq!(store.len(), 2);
        let ndq = store.get("NDQ.AX").unwrap();
        assert_eq!(ndq.quantity, dec!(10));
        assert_eq!(ndq.average_cost, dec!(20));
        assert_eq!(ndq.notes, "core");
        assert_eq!(store.get("btc-usd").unwrap().quantity, Decimal::ZERO);
    }

    #[test]
    fn test_load_aliases_and_normalization() {
        let json = json!([
            {"Ticker": " vgs.ax ", "Quantity": "4", "CostBasis_AUD": 101.5, "Currency": "aud"},
            {"ticker": null, "quantity": 1}
        ]);
        let store = HoldingsStore::load(json.to_string().as_bytes()).unwrap();
        assert_eq!(store.len(), 1);
        let vgs = store.get("VGS.AX").unwrap();
        assert_eq!(vgs.quantity, dec!(4));
        assert_eq!(vgs.currency, Some("AUD".to_string()));
    }

    #[test]
    fn test_load_errors() {
        let cases = [
            "{not json",
            "42",
            "[1, 2]",
            r#"[{"ticker": "A", "quantity": "lots"}]"#,
            r#"[{"ticker": "A", "quantity": -1}]"#,
            r#"[{"ticker": "A"}, {"ticker": "a"}]"#,
            r#"{"Ticker": ["A", "B"], "Quantity": [1]}"#,
            r#"{"Ticker": "A"}"#,
        ];
        for case in cases {
            let res = HoldingsStore::load(case.as_bytes());
            assert!(
                matches!(res, Err(HoldingsError::Format(_))),
                "expected format error for {}",
                case
            );
        }
    }

    #[test]
    fn test_add_update_remove() {
        let mut store = sample();
        assert!(matches!(
            store.add(Holding::new("ndq.ax", dec!(1), dec!(1))),
            Err(HoldingsError::Duplicate(_))
        ));

        store.add(Holding::new("VGS.AX", dec!(2), dec!(100))).unwrap();
        assert_eq!(store.len(), 4);
        assert_eq!(store.holdings().last().unwrap().ticker, "VGS.AX");

        let previous = store
            .update(Holding::new("VGS.AX", dec!(5), dec!(110)))
            .unwrap();
        assert_eq!(previous.quantity, dec!(2));
        assert_eq!(store.get("VGS.AX").unwrap().quantity, dec!(5));
        assert!(matches!(
            store.update(Holding::new("ZIP.AX", dec!(1), dec!(1))),
            Err(HoldingsError::NotFound(_))
        ));

        let removed = store.remove("vgs.ax").unwrap();
        assert_eq!(removed.ticker, "VGS.AX");
        assert!(matches!(store.remove("VGS.AX"), Err(HoldingsError::NotFound(_))));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_deserialized_holdings_are_normalized() {
        let mut store = HoldingsStore::new();
        assert!(store.is_empty());

        let holding: Holding = serde_json::from_value(
            json!({"ticker": " zip.ax ", "quantity": 100, "average_cost": 2, "currency": "aud"}),
        )
        .unwrap();
        store.add(holding).unwrap();
        assert_eq!(store.holdings()[0].ticker, "ZIP.AX");
        assert_eq!(store.holdings()[0].currency, Some("AUD".to_string()));

        let holding: Holding =
            serde_json::from_value(json!({"ticker": "zip.ax", "quantity": 50, "average_cost": 2}))
                .unwrap();
        assert_eq!(store.update(holding).unwrap().quantity, dec!(100));
        assert_eq!(store.get("ZIP.AX").unwrap().quantity, dec!(50));

        assert_eq!(store.remove("zip.ax").unwrap().ticker, "ZIP.AX");
        assert!(store.is_empty());
    }

    #[test]
    fn test_template() {
        let store = HoldingsStore::template();
        assert_eq!(store.len(), DEFAULT_TICKERS.len());
        assert!(store
            .holdings()
            .iter()
            .all(|h| h.quantity.is_zero() && h.average_cost.is_zero()));
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("holdings.json");

        let store = HoldingsStore::load_file(&path).await;
        assert_eq!(store, HoldingsStore::template());

        let store = sample();
        store.save_file(&path).await.unwrap();
        assert_eq!(HoldingsStore::read_file(&path).await.unwrap(), store);

        tokio::fs::write(&path, b"[{").await.unwrap();
        assert!(matches!(
            HoldingsStore::read_file(&path).await,
            Err(HoldingsError::Format(_))
        ));
        assert_eq!(HoldingsStore::load_file(&path).await, HoldingsStore::template());
    }
}
