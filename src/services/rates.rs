use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::{
    error::AppError,
    models::{Currency, Trip},
};

pub const FALLBACK_RATE: f64 = 1.0;

#[async_trait]
pub trait RateSource: Send + Sync {
    async fn rate(&self, from: Currency, to: Currency) -> Result<f64, AppError>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticRates {
    rates: HashMap<(Currency, Currency), f64>,
}

impl StaticRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, from: Currency, to: Currency, rate: f64) -> Self {
        self.rates.insert((from, to), rate);
        self
    }
}

#[async_trait]
impl RateSource for StaticRates {
    async fn rate(&self, from: Currency, to: Currency) -> Result<f64, AppError> {
        if from == to {
            return Ok(1.0);
        }
        self.rates
            .get(&(from, to))
            .copied()
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .ok_or_else(|| AppError::Upstream(format!("no rate for {from} -> {to}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendSummary {
    pub currency: Currency,
    pub total: f64,
    pub by_currency: BTreeMap<String, f64>,
    pub rates: BTreeMap<String, f64>,
}

pub async fn total_spend(trip: &Trip, source: &dyn RateSource) -> SpendSummary {
    let home = trip.base_currency;
    let mut by_currency: BTreeMap<String, f64> = BTreeMap::new();
    let mut rates: BTreeMap<String, f64> = BTreeMap::new();
    let mut total = 0.0;

    for expense in &trip.expenses {
        let code = expense.currency.as_str().to_string();
        *by_currency.entry(code.clone()).or_default() += expense.amount;
        let rate = if let Some(rate) = rates.get(&code).copied() {
            rate
        } else {
            let rate = source
                .rate(expense.currency, home)
                .await
                .unwrap_or_else(|err| {
                    warn!(currency = %expense.currency, "rate lookup failed, using 1.0: {err}");
                    FALLBACK_RATE
                });
            rates.insert(code, rate);
            rate
        };
        total += expense.amount * rate;
    }

    SpendSummary {
        currency: home,
        total,
        by_currency,
        rates,
    }
}
