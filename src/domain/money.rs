use {
    super::error::PipelineError,
    serde::{Deserialize, Deserializer, Serialize, Serializer},
    std::fmt,
    std::ops::Add,
};

/// Non-negative amount in cents. Rendered with two decimals ("18.00").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct MoneyAmount(i64);

impl MoneyAmount {
    pub const ZERO: MoneyAmount = MoneyAmount(0);

    pub fn new(cents: i64) -> Result<Self, PipelineError> {
        if cents < 0 {
            return Err(PipelineError::Validation(format!(
                "MoneyAmount cannot be negative, got: {cents}"
            )));
        }
        Ok(Self(cents))
    }

    /// Builds an amount from a signed intermediate result, clamping at zero.
    pub fn clamped(cents: i64) -> Self {
        Self(cents.max(0))
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parses "20", "20.5", "20.50". More than two decimals is rejected.
    pub fn parse_decimal(raw: &str) -> Result<Self, PipelineError> {
        let raw = raw.trim();
        let invalid = || PipelineError::Validation(format!("invalid amount: {raw:?}"));

        let (whole, frac) = match raw.split_once('.') {
            Some((w, f)) => (w, f),
            None => (raw, ""),
        };
        if whole.is_empty() || frac.len() > 2 || raw.starts_with('-') {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac))
            .map(Self)
            .ok_or_else(invalid)
    }

    pub fn checked_add(self, other: MoneyAmount) -> Option<MoneyAmount> {
        self.0.checked_add(other.0).map(MoneyAmount)
    }

    /// Subtraction that never goes below zero.
    pub fn saturating_sub(self, other: MoneyAmount) -> MoneyAmount {
        MoneyAmount(self.0.saturating_sub(other.0).max(0))
    }

    /// `basis_points` of this amount (1000 bp = 10%), rounded half-up to the cent.
    pub fn percentage(self, basis_points: i64) -> MoneyAmount {
        let scaled = i128::from(self.0) * i128::from(basis_points.clamp(0, 10_000));
        let cents = (scaled + 5_000) / 10_000;
        MoneyAmount(cents as i64)
    }
}

impl Add for MoneyAmount {
    type Output = MoneyAmount;

    fn add(self, rhs: MoneyAmount) -> MoneyAmount {
        MoneyAmount(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for MoneyAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MoneyAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => MoneyAmount::parse_decimal(&s).map_err(serde::de::Error::custom),
            Raw::Number(n) if n.is_finite() && n >= 0.0 => {
                Ok(MoneyAmount((n * 100.0).round() as i64))
            }
            Raw::Number(n) => Err(serde::de::Error::custom(format!("invalid amount: {n}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Eur,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eur => "eur",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
