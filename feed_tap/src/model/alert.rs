//! Alert summary extracted from a forwarded `alert` document.
//!
//! The feed nests the alert body under `data`; flat documents are accepted
//! too. Missing or mistyped fields are simply left out of the summary.
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

/// Fields of an alert worth a log line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AlertSummary {
    /// Ticker symbol.
    pub symbol: Option<String>,
    /// Last price.
    pub price: Option<f64>,
    /// `UP` or `DOWN`.
    pub direction: Option<String>,
    /// Percent change that triggered the alert.
    pub change_percent: Option<f64>,
}

impl AlertSummary {
    /// Builds a summary from the whole forwarded document.
    pub fn from_document(document: &Value) -> Self {
        let body = document
            .get("data")
            .filter(|data| data.is_object())
            .unwrap_or(document);
        serde_json::from_value(body.clone()).unwrap_or_default()
    }
}

impl fmt::Display for AlertSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol.as_deref().unwrap_or("?"))?;
        if let Some(price) = self.price {
            write!(f, " @ {:.2}", price)?;
        }
        if let Some(direction) = &self.direction {
            write!(f, " {}", direction.to_uppercase())?;
        }
        if let Some(change) = self.change_percent {
            write!(f, " ({:+.2}%)", change)?;
        }
        Ok(())
    }
}
