//! Pure fee rules: platform commission, per-processor fees, cancellation tiers,
//! refund window and processor comparison. No I/O; every function is
//! deterministic given its inputs, including the reference time.

use super::money::{Amount, Money};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PLATFORM_FEE_PERCENT: Decimal = dec!(10);
pub const REFUND_WINDOW_HOURS: i64 = 48;
pub const CANCELLATION_TIER_HOURS: i64 = 24;
pub const CANCELLATION_FEE_OVER_24H_PERCENT: Decimal = dec!(10);
pub const CANCELLATION_FEE_UNDER_24H_PERCENT: Decimal = dec!(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessorId {
    Stripe,
    Chase,
}

impl ProcessorId {
    pub const ALL: [ProcessorId; 2] = [ProcessorId::Stripe, ProcessorId::Chase];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorId::Stripe => "STRIPE",
            ProcessorId::Chase => "CHASE",
        }
    }

    /// Fee schedule for this processor and card type.
    pub fn schedule(&self, card_type: CardType) -> FeeSchedule {
        match (self, card_type) {
            (ProcessorId::Stripe, _) => FeeSchedule {
                percent: dec!(2.9),
                fixed: Money::new(dec!(0.30)),
            },
            (ProcessorId::Chase, CardType::Credit) => FeeSchedule {
                percent: dec!(2.6),
                fixed: Money::new(dec!(0.10)),
            },
            (ProcessorId::Chase, CardType::Debit) => FeeSchedule {
                percent: dec!(1.5),
                fixed: Money::new(dec!(0.10)),
            },
        }
    }

    pub fn processing_time(&self) -> &'static str {
        match self {
            ProcessorId::Stripe => "Instant",
            ProcessorId::Chase => "1-2 business days",
        }
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessorId {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STRIPE" => Ok(ProcessorId::Stripe),
            "CHASE" => Ok(ProcessorId::Chase),
            other => Err(SettlementError::ProcessorNotRegistered(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    #[default]
    Credit,
    Debit,
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardType::Credit => f.write_str("credit"),
            CardType::Debit => f.write_str("debit"),
        }
    }
}

impl FromStr for CardType {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "credit" => Ok(CardType::Credit),
            "debit" => Ok(CardType::Debit),
            other => Err(SettlementError::Validation(format!(
                "Unknown card type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    pub percent: Decimal,
    pub fixed: Money,
}

impl FeeSchedule {
    pub fn apply(&self, amount: Money) -> Result<Money> {
        let variable = amount
            .value()
            .checked_mul(self.percent)
            .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
            .ok_or_else(|| SettlementError::Validation("Amount is too large".to_string()))?;
        Money::bounded(variable)?
            .checked_add(self.fixed)
            .map(Money::round2)
    }
}

pub fn platform_fee(amount: Money) -> Result<Money> {
    amount.checked_percent(PLATFORM_FEE_PERCENT)
}

pub fn processor_fee(processor: ProcessorId, amount: Money, card_type: CardType) -> Result<Money> {
    processor.schedule(card_type).apply(amount)
}

/// Customer-facing split of one settlement amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    #[serde(rename = "serviceAmount")]
    pub subtotal: Money,
    pub platform_fee: Money,
    pub processing_fee: Money,
    pub total_amount: Money,
    #[serde(rename = "providerWillReceive")]
    pub provider_amount: Money,
}

impl FeeBreakdown {
    pub fn compute(subtotal: Money, processor: ProcessorId, card_type: CardType) -> Result<Self> {
        let subtotal = Money::bounded(subtotal.value())?.round2();
        let platform_fee = platform_fee(subtotal)?;
        let processing_fee = processor_fee(processor, subtotal, card_type)?;
        Ok(Self {
            subtotal,
            platform_fee,
            processing_fee,
            total_amount: subtotal.checked_add(platform_fee)?.checked_add(processing_fee)?,
            provider_amount: subtotal.checked_sub(platform_fee)?,
        })
    }
}

/// Result of the cancellation fee rule. Never a magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationFee {
    Fixed { percent: Decimal, amount: Money },
    RequiresProviderValidation,
}

impl CancellationFee {
    pub fn none() -> Self {
        CancellationFee::Fixed {
            percent: Decimal::ZERO,
            amount: Money::ZERO,
        }
    }
}

/// Fee owed for cancelling a work order worth `total`.
///
/// The percentage applies to the whole amount for every tier; there is no floor or cap.
pub fn cancellation_fee(
    total: Money,
    quote_accepted_at: Option<DateTime<Utc>>,
    service_started: bool,
    now: DateTime<Utc>,
) -> CancellationFee {
    let Some(accepted_at) = quote_accepted_at else {
        return CancellationFee::none();
    };
    if service_started {
        return CancellationFee::RequiresProviderValidation;
    }
    let percent = if now - accepted_at > Duration::hours(CANCELLATION_TIER_HOURS) {
        CANCELLATION_FEE_OVER_24H_PERCENT
    } else {
        CANCELLATION_FEE_UNDER_24H_PERCENT
    };
    CancellationFee::Fixed {
        percent,
        amount: total.percent(percent),
    }
}

pub fn refund_deadline(captured_at: DateTime<Utc>) -> DateTime<Utc> {
    captured_at + Duration::hours(REFUND_WINDOW_HOURS)
}

/// A refund is allowed while `now - captured_at <= 48h`; afterwards only a dispute is.
pub fn refund_window_open(captured_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now <= refund_deadline(captured_at)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorCost {
    pub processor: ProcessorId,
    pub processing_fee: Money,
    pub platform_fee: Money,
    pub total_amount: Money,
    pub processing_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorComparison {
    pub amount: Money,
    pub card_type: CardType,
    pub options: Vec<ProcessorCost>,
    pub recommended: ProcessorId,
    pub savings: Money,
    pub savings_description: String,
}

impl ProcessorComparison {
    pub fn option(&self, processor: ProcessorId) -> Option<&ProcessorCost> {
        self.options.iter().find(|o| o.processor == processor)
    }
}

/// Total customer cost per processor; the cheapest is recommended, ties going to the
/// first entry in `processors`. Savings are measured against the next cheapest option.
pub fn compare_processors(
    amount: Amount,
    card_type: CardType,
    processors: &[ProcessorId],
) -> Result<ProcessorComparison> {
    let amount = amount.money();
    let options = processors
        .iter()
        .map(|&processor| -> Result<ProcessorCost> {
            let breakdown = FeeBreakdown::compute(amount, processor, card_type)?;
            Ok(ProcessorCost {
                processor,
                processing_fee: breakdown.processing_fee,
                platform_fee: breakdown.platform_fee,
                total_amount: breakdown.total_amount,
                processing_time: processor.processing_time().to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut ranked: Vec<&ProcessorCost> = options.iter().collect();
    // stable sort keeps registration order on ties
    ranked.sort_by_key(|o| o.total_amount);
    let best = ranked.first().ok_or_else(|| {
        SettlementError::Validation("No processors available for comparison".to_string())
    })?;
    let savings = ranked
        .get(1)
        .map(|next| Money::new((next.total_amount - best.total_amount).value().abs()))
        .unwrap_or(Money::ZERO);
    let recommended = best.processor;
    let savings_description = if savings.is_zero() {
        "Same cost with all processors".to_string()
    } else {
        format!("Save ${} with {}", savings, recommended)
    };

    Ok(ProcessorComparison {
        amount,
        card_type,
        recommended,
        savings,
        savings_description,
        options,
    })
}
