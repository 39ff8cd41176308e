//! Payment amounts
//!
//! Amounts travel as decimal strings of base units (satoshis for BTC) and are
//! validated once, at construction. Conversions between denominations use
//! `Decimal`; floating point never touches an amount.

use crate::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of digits in an amount (21M BTC in satoshis fits in 16).
pub const MAX_AMOUNT_DIGITS: usize = 16;

/// Base units per main unit (satoshis per bitcoin).
pub const BASE_UNITS_PER_MAIN: i64 = 100_000_000;

/// Supported currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    #[serde(rename = "BTC")]
    Btc,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Btc => "BTC",
        }
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BTC" => Ok(Self::Btc),
            other => Err(PaymentError::validation(
                "currency",
                format!("unsupported currency: {other}"),
            )),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit the amount string is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Denomination {
    /// Smallest unit (satoshi).
    #[default]
    Base,
    /// Whole unit (bitcoin).
    Main,
}

impl Denomination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "BASE",
            Self::Main => "MAIN",
        }
    }
}

impl FromStr for Denomination {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BASE" => Ok(Self::Base),
            "MAIN" => Ok(Self::Main),
            other => Err(PaymentError::validation(
                "denomination",
                format!("unsupported denomination: {other}"),
            )),
        }
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated amount triple, as received from callers and stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountParams {
    pub amount: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_denomination")]
    pub denomination: String,
}

fn default_currency() -> String {
    Currency::default().as_str().to_string()
}

fn default_denomination() -> String {
    Denomination::default().as_str().to_string()
}

impl AmountParams {
    /// Amount in BTC base units.
    pub fn new(amount: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            currency: default_currency(),
            denomination: default_denomination(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_denomination(mut self, denomination: impl Into<String>) -> Self {
        self.denomination = denomination.into();
        self
    }
}

/// Validated, immutable payment amount.
///
/// # Examples
///
/// ```rust
/// use slashpay_payments::{AmountParams, PaymentAmount};
///
/// let amount = PaymentAmount::new(AmountParams::new("2100")).unwrap();
/// assert_eq!(amount.amount(), "2100");
/// assert_eq!(amount.serialize(), AmountParams::new("2100"));
///
/// assert!(PaymentAmount::new(AmountParams::new("01")).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AmountParams", into = "AmountParams")]
pub struct PaymentAmount {
    amount: String,
    currency: Currency,
    denomination: Denomination,
}

impl PaymentAmount {
    /// Validate and build an amount.
    ///
    /// Checks run in order (amount, currency, denomination) and the first
    /// violation is returned.
    pub fn new(params: AmountParams) -> Result<Self> {
        validate_amount(&params.amount)?;
        let currency = params.currency.parse()?;
        let denomination = params.denomination.parse()?;
        Ok(Self {
            amount: params.amount,
            currency,
            denomination,
        })
    }

    /// Amount of `sats` satoshis.
    pub fn sats(sats: u64) -> Result<Self> {
        Self::new(AmountParams::new(sats.to_string()))
    }

    /// Check params without building an amount.
    pub fn validate(params: &AmountParams) -> Result<()> {
        validate_amount(&params.amount)?;
        params.currency.parse::<Currency>()?;
        params.denomination.parse::<Denomination>()?;
        Ok(())
    }

    pub fn amount(&self) -> &str {
        &self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn denomination(&self) -> Denomination {
        self.denomination
    }

    /// The plain triple this amount was built from.
    pub fn serialize(&self) -> AmountParams {
        AmountParams {
            amount: self.amount.clone(),
            currency: self.currency.as_str().to_string(),
            denomination: self.denomination.as_str().to_string(),
        }
    }

    fn value(&self) -> Decimal {
        // Validated digits, at most 16 of them, always fit a Decimal
        Decimal::from_str(&self.amount).unwrap_or_default()
    }

    /// Amount expressed in base units.
    pub fn as_base_units(&self) -> Decimal {
        match self.denomination {
            Denomination::Base => self.value(),
            Denomination::Main => self.value() * Decimal::from(BASE_UNITS_PER_MAIN),
        }
    }

    /// Amount expressed in main units.
    pub fn as_main_units(&self) -> Decimal {
        match self.denomination {
            Denomination::Base => self.value() / Decimal::from(BASE_UNITS_PER_MAIN),
            Denomination::Main => self.value(),
        }
    }
}

impl TryFrom<AmountParams> for PaymentAmount {
    type Error = PaymentError;

    fn try_from(params: AmountParams) -> Result<Self> {
        Self::new(params)
    }
}

impl From<PaymentAmount> for AmountParams {
    fn from(amount: PaymentAmount) -> Self {
        amount.serialize()
    }
}

impl fmt::Display for PaymentAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.amount, self.currency, self.denomination)
    }
}

fn validate_amount(amount: &str) -> Result<()> {
    if amount.is_empty() {
        return Err(PaymentError::validation("amount", "is required"));
    }
    let mut digits = amount.chars();
    let leading_ok = digits.next().is_some_and(|c| ('1'..='9').contains(&c));
    if !leading_ok || !digits.all(|c| c.is_ascii_digit()) {
        return Err(PaymentError::validation(
            "amount",
            "must be a positive integer without leading zeros",
        ));
    }
    if amount.len() > MAX_AMOUNT_DIGITS {
        return Err(PaymentError::validation(
            "amount",
            format!("must have at most {MAX_AMOUNT_DIGITS} digits"),
        ));
    }
    Ok(())
}
