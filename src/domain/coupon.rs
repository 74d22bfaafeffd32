use {
    super::error::PipelineError,
    super::money::MoneyAmount,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }
}

impl TryFrom<&str> for DiscountType {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "percentage" => Ok(Self::Percentage),
            "fixed" => Ok(Self::Fixed),
            other => Err(PipelineError::Validation(format!(
                "unknown discount type: {other}"
            ))),
        }
    }
}

/// Why a coupon cannot be used right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponRejection {
    Inactive,
    NotYetValid,
    Expired,
    Exhausted,
}

impl fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Inactive => "coupon is deactivated",
            Self::NotYetValid => "coupon is not valid yet",
            Self::Expired => "coupon has expired",
            Self::Exhausted => "coupon usage limit reached",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    /// Cents for `Fixed`, basis points for `Percentage` (1000 = 10%).
    pub discount_value: i64,
    pub usage_count: i64,
    pub usage_limit: Option<i64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Coupon {
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive);
        }
        if self.valid_from.is_some_and(|from| from > now) {
            return Err(CouponRejection::NotYetValid);
        }
        if self.valid_until.is_some_and(|until| until < now) {
            return Err(CouponRejection::Expired);
        }
        if self.usage_limit.is_some_and(|limit| self.usage_count >= limit) {
            return Err(CouponRejection::Exhausted);
        }
        Ok(())
    }

    /// Discounted amount, never below zero.
    pub fn apply(&self, amount: MoneyAmount) -> MoneyAmount {
        let discount = match self.discount_type {
            DiscountType::Percentage => amount.percentage(self.discount_value),
            DiscountType::Fixed => MoneyAmount::clamped(self.discount_value),
        };
        amount.saturating_sub(discount)
    }

    /// Human value as entered in the admin UI: "10" for 10%, "5.00" for fixed.
    pub fn display_value(&self) -> String {
        match self.discount_type {
            DiscountType::Percentage if self.discount_value % 100 == 0 => {
                (self.discount_value / 100).to_string()
            }
            DiscountType::Percentage => MoneyAmount::clamped(self.discount_value).to_string(),
            DiscountType::Fixed => MoneyAmount::clamped(self.discount_value).to_string(),
        }
    }
}
