use crate::error::{EnrichError, Result};
use crate::types::FlagReason;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Built-in USD value of one unit of each currency. Config entries override these.
const DEFAULT_USD_PER_UNIT: &[(&str, f64)] = &[
    ("USD", 1.0),
    ("EUR", 1.08),
    ("GBP", 1.27),
    ("CAD", 0.74),
    ("AUD", 0.66),
    ("NZD", 0.61),
    ("JPY", 0.0067),
    ("CHF", 1.13),
    ("SEK", 0.095),
    ("NOK", 0.094),
    ("DKK", 0.145),
    ("INR", 0.012),
    ("CNY", 0.14),
    ("SGD", 0.74),
    ("HKD", 0.128),
    ("BRL", 0.2),
    ("MXN", 0.058),
    ("ZAR", 0.054),
    ("ILS", 0.27),
    ("PLN", 0.25),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
    /// ISO code every revenue figure is converted to
    pub target: String,
    /// Extra or replacement rates, keyed by ISO code
    pub usd_per_unit: BTreeMap<String, f64>,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            target: "USD".to_string(),
            usd_per_unit: BTreeMap::new(),
        }
    }
}

impl CurrencyConfig {
    pub fn rates(&self) -> BTreeMap<String, f64> {
        let mut rates: BTreeMap<String, f64> = DEFAULT_USD_PER_UNIT
            .iter()
            .map(|(code, rate)| (code.to_string(), *rate))
            .collect();
        for (code, rate) in &self.usd_per_unit {
            rates.insert(code.trim().to_uppercase(), *rate);
        }
        rates
    }

    pub fn validate(&self) -> Result<()> {
        let rates = self.rates();
        if let Some((code, _)) = rates.iter().find(|(_, rate)| !rate.is_finite() || **rate <= 0.0) {
            return Err(EnrichError::Config(format!(
                "currency rate for {} must be a positive number",
                code
            )));
        }
        let target = self.target.trim().to_uppercase();
        if !rates.contains_key(&target) {
            return Err(EnrichError::Config(format!(
                "no conversion rate for target currency '{}'",
                self.target
            )));
        }
        Ok(())
    }
}

/// Outcome of normalizing one revenue value.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRevenue {
    pub value: Value,
    /// Set when the value could not be converted
    pub flag: Option<FlagReason>,
}

#[derive(Debug, Clone)]
pub struct CurrencyConverter {
    target: String,
    usd_per_unit: BTreeMap<String, f64>,
}

impl CurrencyConverter {
    pub fn new(config: &CurrencyConfig) -> Self {
        Self {
            target: config.target.trim().to_uppercase(),
            usd_per_unit: config.rates(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn knows(&self, code: &str) -> bool {
        self.usd_per_unit.contains_key(&code.trim().to_uppercase())
    }

    pub fn convert(&self, amount: f64, from: &str, to: &str) -> Option<f64> {
        let from_rate = self.usd_per_unit.get(&from.trim().to_uppercase())?;
        let to_rate = self.usd_per_unit.get(&to.trim().to_uppercase())?;
        Some(amount * from_rate / to_rate)
    }

    /// Convert a `{amount, currency, range}` value to the target currency.
    ///
    /// Values without a currency, or with an unknown one, are returned as
    /// given together with a flag.
    pub fn normalize_revenue(&self, value: &Value) -> NormalizedRevenue {
        let Some(obj) = value.as_object() else {
            return NormalizedRevenue {
                value: value.clone(),
                flag: Some(FlagReason::MissingCurrency),
            };
        };
        let Some(amount) = revenue_amount(value) else {
            // Only a textual range; nothing to convert
            return NormalizedRevenue {
                value: value.clone(),
                flag: None,
            };
        };
        let currency = obj
            .get("currency")
            .and_then(Value::as_str)
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty());

        let Some(currency) = currency else {
            return NormalizedRevenue {
                value: value.clone(),
                flag: Some(FlagReason::MissingCurrency),
            };
        };

        if currency == self.target {
            let mut out = obj.clone();
            out.insert("amount".into(), number(amount));
            out.insert("currency".into(), Value::String(currency));
            return NormalizedRevenue {
                value: Value::Object(out),
                flag: None,
            };
        }

        match self.convert(amount, &currency, &self.target) {
            Some(converted) => {
                let mut out = Map::new();
                out.insert("amount".into(), number(converted.round()));
                out.insert("currency".into(), Value::String(self.target.clone()));
                if let Some(range) = obj.get("range").filter(|r| !r.is_null()) {
                    out.insert("range".into(), range.clone());
                }
                out.insert("original_amount".into(), number(amount));
                out.insert("original_currency".into(), Value::String(currency));
                NormalizedRevenue {
                    value: Value::Object(out),
                    flag: None,
                }
            }
            None => NormalizedRevenue {
                value: value.clone(),
                flag: Some(FlagReason::UnknownCurrency),
            },
        }
    }

    /// Amount in the target currency, if the value can be expressed in it.
    pub fn amount_in_target(&self, value: &Value) -> Option<f64> {
        let amount = revenue_amount(value)?;
        let currency = value.get("currency").and_then(Value::as_str)?;
        self.convert(amount, currency, &self.target)
    }
}

/// `amount` as a number, accepting numeric strings like "1,200,000".
pub fn revenue_amount(value: &Value) -> Option<f64> {
    let amount = match value.get("amount")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace([',', '$', ' '], "").parse::<f64>().ok(),
        _ => None,
    };
    amount.filter(|a| a.is_finite() && *a > 0.0)
}

fn number(amount: f64) -> Value {
    if amount.fract() == 0.0 && amount.abs() < i64::MAX as f64 {
        json!(amount as i64)
    } else {
        json!(amount)
    }
}
