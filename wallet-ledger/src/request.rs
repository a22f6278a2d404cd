//! Typed requests for a request-handling layer
//!
//! Range and precision checks live here. The engine itself only rejects
//! non-positive amounts.

use crate::{types::OwnerId, Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fractional digits accepted for monetary amounts
pub const AMOUNT_SCALE: u32 = 2;

/// Smallest accepted amount (0.01)
pub fn minimum_amount() -> Decimal {
    Decimal::new(1, AMOUNT_SCALE)
}

/// Check an amount is at least 0.01 with at most two fractional digits
pub fn validate_amount(amount: Decimal) -> Result<()> {
    if amount < minimum_amount() {
        return Err(Error::InvalidAmount(format!(
            "amount must be at least {}, got {}",
            minimum_amount(),
            amount
        )));
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(Error::InvalidAmount(format!(
            "amount {} has more than {} decimal places",
            amount, AMOUNT_SCALE
        )));
    }
    Ok(())
}

fn validate_owner(field: &str, owner_id: &OwnerId) -> Result<()> {
    if owner_id.is_blank() {
        return Err(Error::InvalidRequest(format!("{} must not be blank", field)));
    }
    Ok(())
}

/// Transfer between two owners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Owner paying
    pub source_owner_id: OwnerId,
    /// Owner receiving
    pub target_owner_id: OwnerId,
    /// Amount, at least 0.01
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    /// Optional description for both legs
    #[serde(default)]
    pub description: Option<String>,
}

impl TransferRequest {
    /// Create request
    pub fn new(
        source_owner_id: impl Into<OwnerId>,
        target_owner_id: impl Into<OwnerId>,
        amount: Decimal,
    ) -> Self {
        Self {
            source_owner_id: source_owner_id.into(),
            target_owner_id: target_owner_id.into(),
            amount,
            description: None,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate fields
    pub fn validate(&self) -> Result<()> {
        validate_owner("sourceOwnerId", &self.source_owner_id)?;
        validate_owner("targetOwnerId", &self.target_owner_id)?;
        validate_amount(self.amount)
    }
}

/// Deposit or withdrawal against one owner's wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountRequest {
    /// Wallet owner
    pub owner_id: OwnerId,
    /// Amount, at least 0.01
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

impl AmountRequest {
    /// Create request
    pub fn new(owner_id: impl Into<OwnerId>, amount: Decimal) -> Self {
        Self {
            owner_id: owner_id.into(),
            amount,
            description: None,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate fields
    pub fn validate(&self) -> Result<()> {
        validate_owner("ownerId", &self.owner_id)?;
        validate_amount(self.amount)
    }
}
