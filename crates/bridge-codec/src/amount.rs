// bridge-codec/src/amount.rs

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

use crate::quantity::{decode_big_auto, encode_big};
use crate::{CodecError, CodecResult};

/// Decimal places of the backend's native coin
pub const NATIVE_DECIMALS: u32 = 8;

/// Wei per satoshi (10^18 / 10^8)
pub const WEI_PER_SATOSHI: u64 = 10_000_000_000;

/// Satoshi per coin
pub const SATOSHI_PER_COIN: u64 = 100_000_000;

/// Minimum gas price accepted by the backend: 0.0000004 coin per gas
pub const MIN_GAS_PRICE_SATOSHI: u64 = 40;

/// Gas price is reported to Ethereum clients at one gwei per satoshi
pub const GAS_PRICE_WEI_PER_SATOSHI: u64 = 1_000_000_000;

/// An amount of the backend's native coin, held in satoshi
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NativeAmount {
    satoshis: BigUint,
}

impl NativeAmount {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_satoshis(satoshis: impl Into<BigUint>) -> Self {
        Self {
            satoshis: satoshis.into(),
        }
    }

    pub fn satoshis(&self) -> &BigUint {
        &self.satoshis
    }

    pub fn is_zero(&self) -> bool {
        self.satoshis.is_zero()
    }

    /// Truncating conversion: anything below one satoshi is dropped
    pub fn from_wei(wei: &BigUint) -> Self {
        Self {
            satoshis: wei / BigUint::from(WEI_PER_SATOSHI),
        }
    }

    /// Parse a wei amount (`0x` hex or decimal digits) and truncate it
    pub fn parse_wei(wei: &str) -> CodecResult<Self> {
        let value = decode_big_auto(wei)?;
        Ok(Self::from_wei(&value))
    }

    /// Exact conversion to wei
    pub fn to_wei(&self) -> CodecResult<BigUint> {
        let factor = BigUint::from(WEI_PER_SATOSHI);
        let wei = &self.satoshis * &factor;
        if &wei / &factor != self.satoshis || !(&wei % &factor).is_zero() {
            return Err(CodecError::PrecisionLoss(self.to_string()));
        }
        Ok(wei)
    }

    pub fn to_wei_hex(&self) -> CodecResult<String> {
        Ok(encode_big(&self.to_wei()?))
    }

    /// Build from a coin-denominated decimal, rejecting sub-satoshi digits
    pub fn from_coins(coins: Decimal) -> CodecResult<Self> {
        if coins.is_sign_negative() && !coins.is_zero() {
            return Err(CodecError::MalformedNumber(coins.to_string()));
        }
        let scaled = coins
            .checked_mul(Decimal::from(SATOSHI_PER_COIN))
            .ok_or_else(|| CodecError::MalformedNumber(coins.to_string()))?;
        if scaled.fract() != Decimal::ZERO {
            return Err(CodecError::PrecisionLoss(coins.to_string()));
        }
        let digits = scaled.trunc().normalize().to_string();
        let satoshis = BigUint::from_str(&digits)
            .map_err(|_| CodecError::MalformedNumber(coins.to_string()))?;
        Ok(Self { satoshis })
    }

    /// Parse a coin-denominated decimal string such as `"0.5"`
    pub fn parse_coins(s: &str) -> CodecResult<Self> {
        let coins = Decimal::from_str(s.trim())
            .map_err(|_| CodecError::MalformedNumber(s.to_string()))?;
        Self::from_coins(coins)
    }

    /// Coin-denominated decimal, normalized (`1`, `0.5`, `0.00000001`)
    pub fn to_coins(&self) -> CodecResult<Decimal> {
        let satoshis = self
            .satoshis
            .to_i128()
            .ok_or_else(|| CodecError::PrecisionLoss(self.satoshis.to_string()))?;
        if satoshis > Decimal::MAX.mantissa() {
            return Err(CodecError::PrecisionLoss(self.satoshis.to_string()));
        }
        Ok(Decimal::from_i128_with_scale(satoshis, NATIVE_DECIMALS).normalize())
    }

    pub fn checked_sub(&self, other: &NativeAmount) -> Option<NativeAmount> {
        if other.satoshis > self.satoshis {
            return None;
        }
        Some(Self {
            satoshis: &self.satoshis - &other.satoshis,
        })
    }
}

impl std::ops::Add for NativeAmount {
    type Output = NativeAmount;

    fn add(self, rhs: NativeAmount) -> NativeAmount {
        NativeAmount {
            satoshis: self.satoshis + rhs.satoshis,
        }
    }
}

impl std::ops::AddAssign<&NativeAmount> for NativeAmount {
    fn add_assign(&mut self, rhs: &NativeAmount) {
        self.satoshis += &rhs.satoshis;
    }
}

impl std::iter::Sum for NativeAmount {
    fn sum<I: Iterator<Item = NativeAmount>>(iter: I) -> Self {
        iter.fold(NativeAmount::zero(), |acc, x| acc + x)
    }
}

impl fmt::Debug for NativeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeAmount({} sat)", self.satoshis)
    }
}

impl fmt::Display for NativeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_coins() {
            Ok(coins) => write!(f, "{}", coins),
            Err(_) => write!(f, "{} sat", self.satoshis),
        }
    }
}

/// Convert a wei gas price to satoshi per gas, clamped to the backend minimum
pub fn gas_price_from_wei(wei: &BigUint) -> NativeAmount {
    let price = NativeAmount::from_wei(wei);
    let floor = NativeAmount::from_satoshis(MIN_GAS_PRICE_SATOSHI);
    if price < floor {
        floor
    } else {
        price
    }
}

/// Gas price as reported by `eth_gasPrice`
pub fn min_gas_price_wei() -> BigUint {
    BigUint::from(MIN_GAS_PRICE_SATOSHI) * BigUint::from(GAS_PRICE_WEI_PER_SATOSHI)
}
