//! Fixed-point money with an explicit currency.
//!
//! # Representation
//!
//! All monetary amounts use a 1e-6 (micros) fixed-point representation
//! stored as `i64`: 1 USD = 1_000_000 micros. Decimal strings are the only
//! way values enter this type from the outside world; there is no `f64`
//! path anywhere on the price surface.
//!
//! # Arithmetic
//!
//! - `checked_add` / `checked_sub` require matching currencies and detect
//!   overflow; both conditions are errors, never silent.
//! - `mul_quantity` multiplies a per-unit amount by an integer share count
//!   with overflow detection.
//! - `round_to_cents` applies banker's rounding (ties to even) at two
//!   fractional digits; derived monetary sums go through it.

use std::fmt;

use crate::error::DomainError;

/// Scale factor: 1 currency unit = 1_000_000 micros.
pub const MICROS_PER_UNIT: i64 = 1_000_000;

/// Maximum fractional digits accepted when parsing a decimal string.
const MAX_SCALE: u32 = 6;

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// Three-letter uppercase currency code (ISO-4217 style).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Currency([u8; 3]);

impl Currency {
    /// United States dollar, the upstream provider's quote currency.
    pub const USD: Currency = Currency(*b"USD");

    pub fn new(code: impl AsRef<str>) -> Result<Self, DomainError> {
        let s = code.as_ref();
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(DomainError::InvalidCurrency { raw: s.to_string() });
        }
        Ok(Currency([bytes[0], bytes[1], bytes[2]]))
    }

    pub fn as_str(&self) -> &str {
        // Construction guarantees ASCII.
        std::str::from_utf8(&self.0).expect("currency bytes are ASCII")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Currency({})", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount tagged with its currency.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Money {
    micros: i64,
    currency: Currency,
}

impl Money {
    /// Construct from a raw micros value.
    ///
    /// Use only when the integer is already known to be at 1e-6 scale
    /// (store rows, test fixtures). External decimal input goes through
    /// [`Money::parse`].
    pub const fn from_micros(micros: i64, currency: Currency) -> Self {
        Money { micros, currency }
    }

    /// Parse a decimal string (`"150.25"`, `"-3.1"`, `"42"`) into micros.
    ///
    /// At most six fractional digits are accepted; more is an ambiguous
    /// conversion and an error, matching the ingestion rule everywhere
    /// else in the workspace.
    pub fn parse(raw: &str, currency: Currency) -> Result<Self, DomainError> {
        let micros = parse_decimal_to_micros(raw)?;
        Ok(Money { micros, currency })
    }

    pub const fn micros(&self) -> i64 {
        self.micros
    }

    pub const fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.micros > 0
    }

    /// Addition; currencies must match and the sum must not overflow.
    pub fn checked_add(&self, rhs: &Money) -> Result<Money, DomainError> {
        self.require_same_currency(rhs)?;
        let micros = self
            .micros
            .checked_add(rhs.micros)
            .ok_or_else(|| DomainError::Overflow { op: "add".into() })?;
        Ok(Money { micros, currency: self.currency })
    }

    /// Subtraction; currencies must match and the difference must not overflow.
    pub fn checked_sub(&self, rhs: &Money) -> Result<Money, DomainError> {
        self.require_same_currency(rhs)?;
        let micros = self
            .micros
            .checked_sub(rhs.micros)
            .ok_or_else(|| DomainError::Overflow { op: "sub".into() })?;
        Ok(Money { micros, currency: self.currency })
    }

    /// Multiply a per-unit amount by an integer quantity (share count).
    ///
    /// Overflow in a trade-value calculation is a critical error, not a
    /// saturation case; callers must handle it.
    pub fn mul_quantity(&self, qty: i64) -> Result<Money, DomainError> {
        let micros = self
            .micros
            .checked_mul(qty)
            .ok_or_else(|| DomainError::Overflow { op: "mul_quantity".into() })?;
        Ok(Money { micros, currency: self.currency })
    }

    /// Round to two fractional digits with banker's rounding (ties to even).
    pub fn round_to_cents(&self) -> Money {
        // 1 cent = 10_000 micros. Euclidean division keeps the remainder in
        // [0, 10_000) for negative amounts too, so one code path covers both
        // signs.
        const CENT: i64 = 10_000;
        let q = self.micros.div_euclid(CENT);
        let r = self.micros.rem_euclid(CENT);
        let rounded = match r.cmp(&(CENT / 2)) {
            std::cmp::Ordering::Less => q,
            std::cmp::Ordering::Greater => q + 1,
            std::cmp::Ordering::Equal => {
                if q % 2 == 0 {
                    q
                } else {
                    q + 1
                }
            }
        };
        Money { micros: rounded * CENT, currency: self.currency }
    }

    fn require_same_currency(&self, rhs: &Money) -> Result<(), DomainError> {
        if self.currency != rhs.currency {
            return Err(DomainError::CurrencyMismatch {
                left: self.currency.as_str().to_string(),
                right: rhs.currency.as_str().to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    /// Canonical decimal form, trailing fractional zeros trimmed:
    /// `150.25 USD`, `-3.1 USD`, `42 USD`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", format_micros(self.micros), self.currency)
    }
}

/// Render a micros value as a plain decimal string without the currency.
pub fn format_micros(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    let whole = abs / MICROS_PER_UNIT as u64;
    let frac = abs % MICROS_PER_UNIT as u64;
    if frac == 0 {
        return format!("{sign}{whole}");
    }
    let frac_str = format!("{frac:06}");
    format!("{sign}{whole}.{}", frac_str.trim_end_matches('0'))
}

/// Parse a decimal string into micros.
///
/// Accepts an optional leading `-`, digits, and an optional fraction of at
/// most [`MAX_SCALE`] digits. Anything else is an error.
fn parse_decimal_to_micros(raw: &str) -> Result<i64, DomainError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(DomainError::InvalidDecimal { raw: raw.to_string() });
    }

    let (negative, rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s),
    };

    let (whole_str, frac_str) = match rest.split_once('.') {
        Some((w, f)) => (w, f),
        None => (rest, ""),
    };

    if whole_str.is_empty() && frac_str.is_empty() {
        return Err(DomainError::InvalidDecimal { raw: raw.to_string() });
    }
    if !whole_str.bytes().all(|b| b.is_ascii_digit())
        || !frac_str.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(DomainError::InvalidDecimal { raw: raw.to_string() });
    }
    if frac_str.len() as u32 > MAX_SCALE {
        return Err(DomainError::TooManyDecimalPlaces { raw: raw.to_string() });
    }

    let whole: i64 = if whole_str.is_empty() {
        0
    } else {
        whole_str
            .parse()
            .map_err(|_| DomainError::Overflow { op: "parse".into() })?
    };

    let mut frac: i64 = if frac_str.is_empty() {
        0
    } else {
        frac_str
            .parse()
            .map_err(|_| DomainError::InvalidDecimal { raw: raw.to_string() })?
    };
    for _ in frac_str.len() as u32..MAX_SCALE {
        frac *= 10;
    }

    let micros = whole
        .checked_mul(MICROS_PER_UNIT)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| DomainError::Overflow { op: "parse".into() })?;

    Ok(if negative { -micros } else { micros })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(raw: &str) -> Money {
        Money::parse(raw, Currency::USD).unwrap()
    }

    #[test]
    fn parses_plain_and_fractional_decimals() {
        assert_eq!(usd("150.25").micros(), 150_250_000);
        assert_eq!(usd("0.0001").micros(), 100);
        assert_eq!(usd("42").micros(), 42_000_000);
        assert_eq!(usd("-3.1").micros(), -3_100_000);
        assert_eq!(usd(".5").micros(), 500_000);
    }

    #[test]
    fn rejects_garbage_and_excess_scale() {
        assert!(Money::parse("", Currency::USD).is_err());
        assert!(Money::parse("abc", Currency::USD).is_err());
        assert!(Money::parse("1.2.3", Currency::USD).is_err());
        assert!(Money::parse("1,5", Currency::USD).is_err());
        assert!(matches!(
            Money::parse("1.1234567", Currency::USD),
            Err(DomainError::TooManyDecimalPlaces { .. })
        ));
    }

    #[test]
    fn display_roundtrips_through_parse() {
        for raw in ["150.25", "0.0001", "42", "-3.1", "199.999999"] {
            let m = usd(raw);
            let rendered = format_micros(m.micros());
            assert_eq!(Money::parse(&rendered, Currency::USD).unwrap(), m);
        }
    }

    #[test]
    fn add_and_sub_require_matching_currency() {
        let a = usd("10");
        let b = Money::parse("5", Currency::new("EUR").unwrap()).unwrap();
        assert!(matches!(
            a.checked_add(&b),
            Err(DomainError::CurrencyMismatch { .. })
        ));
        assert!(matches!(
            a.checked_sub(&b),
            Err(DomainError::CurrencyMismatch { .. })
        ));
        assert_eq!(a.checked_add(&usd("2.5")).unwrap(), usd("12.5"));
    }

    #[test]
    fn arithmetic_overflow_is_an_error() {
        let max = Money::from_micros(i64::MAX, Currency::USD);
        assert!(max.checked_add(&usd("0.000001")).is_err());
        assert!(max.mul_quantity(2).is_err());
    }

    #[test]
    fn mul_quantity_scales_per_unit_price() {
        assert_eq!(usd("150.25").mul_quantity(10).unwrap(), usd("1502.5"));
        assert_eq!(usd("0.5").mul_quantity(-4).unwrap(), usd("-2"));
    }

    #[test]
    fn banker_rounding_ties_go_to_even() {
        // 0.125 -> 0.12 (2 is even), 0.135 -> 0.14 (4 is even)
        assert_eq!(usd("0.125").round_to_cents(), usd("0.12"));
        assert_eq!(usd("0.135").round_to_cents(), usd("0.14"));
        // Non-ties round nearest.
        assert_eq!(usd("0.1251").round_to_cents(), usd("0.13"));
        assert_eq!(usd("10.994999").round_to_cents(), usd("10.99"));
        // Negative amounts mirror correctly.
        assert_eq!(usd("-0.125").round_to_cents(), usd("-0.12"));
    }

    #[test]
    fn currency_validation() {
        assert!(Currency::new("USD").is_ok());
        for bad in ["", "US", "usd", "USDX", "U$D"] {
            assert!(Currency::new(bad).is_err(), "should reject {bad:?}");
        }
    }
}
