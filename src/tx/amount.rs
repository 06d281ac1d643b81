//! Scale-checked amounts
//!
//! Every chain has its own base-unit scale (10^8, 10^18, ...). Amounts carry
//! their scale so that mixing chains in one computation fails fast.

use crate::error::{SwapError, SwapResult};

use ethers::types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// Largest scale representable by `Decimal`
const MAX_DECIMALS: u32 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    decimals: u32,
}

impl Scale {
    pub fn new(decimals: u32) -> Self {
        Self { decimals }
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn ensure_same(&self, other: Scale) -> SwapResult<()> {
        if self.decimals != other.decimals {
            return Err(SwapError::ScaleMismatch {
                left: self.decimals,
                right: other.decimals,
            });
        }
        Ok(())
    }

    /// Display units to base units, rejecting precision the chain cannot hold
    pub fn to_base_units(&self, value: Decimal) -> SwapResult<U256> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(SwapError::InvalidAmount(format!("{} is negative", value)));
        }
        if self.decimals > MAX_DECIMALS {
            return Err(SwapError::InvalidAmount(format!(
                "{} decimals exceed supported precision",
                self.decimals
            )));
        }

        let factor = Decimal::from_i128_with_scale(10i128.pow(self.decimals), 0);
        let scaled = value
            .checked_mul(factor)
            .ok_or_else(|| SwapError::InvalidAmount(format!("{} overflows", value)))?;
        if !scaled.fract().is_zero() {
            return Err(SwapError::InvalidAmount(format!(
                "{} has more than {} decimal places",
                value, self.decimals
            )));
        }

        scaled
            .to_u128()
            .map(U256::from)
            .ok_or_else(|| SwapError::InvalidAmount(format!("{} overflows", value)))
    }

    pub fn from_base_units(&self, units: U256) -> SwapResult<Decimal> {
        Decimal::from_str(&self.format(units))
            .map_err(|e| SwapError::InvalidAmount(format!("{} base units: {}", units, e)))
    }

    /// Base units rendered with exactly `decimals` fractional digits
    pub fn format(&self, units: U256) -> String {
        if self.decimals == 0 {
            return units.to_string();
        }
        let factor = U256::exp10(self.decimals as usize);
        let integer = units / factor;
        let fraction = (units % factor).to_string();
        format!(
            "{}.{:0>width$}",
            integer,
            fraction,
            width = self.decimals as usize
        )
    }
}

/// Base-unit amount tagged with its chain scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amount {
    units: U256,
    scale: Scale,
}

impl Amount {
    pub fn new(units: U256, scale: Scale) -> Self {
        Self { units, scale }
    }

    pub fn from_decimal(value: Decimal, scale: Scale) -> SwapResult<Self> {
        Ok(Self::new(scale.to_base_units(value)?, scale))
    }

    pub fn zero(scale: Scale) -> Self {
        Self::new(U256::zero(), scale)
    }

    pub fn units(&self) -> U256 {
        self.units
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn checked_add(&self, other: Amount) -> SwapResult<Amount> {
        self.scale.ensure_same(other.scale)?;
        let units = self
            .units
            .checked_add(other.units)
            .ok_or_else(|| SwapError::InvalidAmount("amount overflow".to_string()))?;
        Ok(Amount::new(units, self.scale))
    }

    /// `None` when `other` exceeds `self`
    pub fn checked_sub(&self, other: Amount) -> SwapResult<Option<Amount>> {
        self.scale.ensure_same(other.scale)?;
        Ok(self
            .units
            .checked_sub(other.units)
            .map(|units| Amount::new(units, self.scale)))
    }

    pub fn to_u64(&self) -> SwapResult<u64> {
        u64::try_from(self.units)
            .map_err(|_| SwapError::InvalidAmount(format!("{} does not fit in 64 bits", self)))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scale.format(self.units))
    }
}
