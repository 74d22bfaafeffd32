//! Authoritative amount calculation.
//!
//! Everything here is pure: the checkout service resolves committee
//! membership, trip data and the coupon from the content store first, then
//! asks [`calculate`] for the amount that actually gets charged. The client's
//! amount only survives when the server holds no price of its own.

use {
    super::coupon::Coupon,
    super::money::MoneyAmount,
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipRates {
    pub committee: MoneyAmount,
    pub standard: MoneyAmount,
}

impl Default for MembershipRates {
    fn default() -> Self {
        Self {
            committee: MoneyAmount::clamped(1000),
            standard: MoneyAmount::clamped(2000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedActivity {
    pub price: MoneyAmount,
    pub option_prices: Vec<MoneyAmount>,
}

/// Server-held figures for a trip's remaining payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripQuote {
    pub base_price: MoneyAmount,
    pub activities: Vec<SelectedActivity>,
    pub crew_discount: MoneyAmount,
    pub is_crew: bool,
    pub deposit: MoneyAmount,
}

impl TripQuote {
    /// `base + Σ(activity + options) − crew discount − deposit`, clamped at zero.
    pub fn remaining(&self) -> MoneyAmount {
        let activities = self
            .activities
            .iter()
            .flat_map(|a| std::iter::once(a.price).chain(a.option_prices.iter().copied()))
            .fold(MoneyAmount::ZERO, |acc, p| acc + p);
        let discount = if self.is_crew {
            self.crew_discount
        } else {
            MoneyAmount::ZERO
        };
        let total = i128::from((self.base_price + activities).cents())
            - i128::from(discount.cents())
            - i128::from(self.deposit.cents());
        MoneyAmount::clamped(total.clamp(0, i128::from(i64::MAX)) as i64)
    }
}

/// Where the pre-coupon price comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingBasis {
    Contribution { committee_member: bool },
    TripFinal(TripQuote),
    TripDeposit { deposit: MoneyAmount },
    /// Price listed on the event / pub crawl in the content store.
    Listed(MoneyAmount),
    /// Nothing server-side to go on; the client hint stands.
    Hint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub amount: MoneyAmount,
    pub base: MoneyAmount,
    /// Set when a coupon passed validation and was applied.
    pub coupon_id: Option<Uuid>,
}

pub fn base_amount(hint: MoneyAmount, basis: &PricingBasis, rates: &MembershipRates) -> MoneyAmount {
    match basis {
        PricingBasis::Contribution { committee_member: true } => rates.committee,
        PricingBasis::Contribution { committee_member: false } => rates.standard,
        PricingBasis::TripFinal(trip) => trip.remaining(),
        PricingBasis::TripDeposit { deposit } => *deposit,
        PricingBasis::Listed(price) => *price,
        PricingBasis::Hint => hint,
    }
}

/// Coupons apply after the base is fixed. An unusable coupon is ignored
/// rather than failing the checkout.
pub fn calculate(
    hint: MoneyAmount,
    basis: &PricingBasis,
    rates: &MembershipRates,
    coupon: Option<&Coupon>,
    now: DateTime<Utc>,
) -> Quote {
    let base = base_amount(hint, basis, rates);

    let Some(coupon) = coupon else {
        return Quote {
            amount: base,
            base,
            coupon_id: None,
        };
    };

    match coupon.check(now) {
        Ok(()) => Quote {
            amount: coupon.apply(base),
            base,
            coupon_id: Some(coupon.id),
        },
        Err(reason) => {
            tracing::warn!(code = %coupon.code, %reason, "coupon ignored");
            Quote {
                amount: base,
                base,
                coupon_id: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::coupon::DiscountType;

    fn cents(c: i64) -> MoneyAmount {
        MoneyAmount::new(c).unwrap()
    }

    fn save10() -> Coupon {
        Coupon {
            id: Uuid::now_v7(),
            code: "SAVE10".into(),
            discount_type: DiscountType::Percentage,
            discount_value: 1000,
            usage_count: 0,
            usage_limit: None,
            valid_from: None,
            valid_until: None,
            is_active: true,
        }
    }

    #[test]
    fn committee_member_pays_committee_rate_whatever_the_hint() {
        let quote = calculate(
            cents(2000),
            &PricingBasis::Contribution { committee_member: true },
            &MembershipRates::default(),
            None,
            Utc::now(),
        );
        assert_eq!(quote.amount.to_string(), "10.00");
    }

    #[test]
    fn contribution_hint_is_discarded() {
        let quote = calculate(
            cents(1),
            &PricingBasis::Contribution { committee_member: false },
            &MembershipRates::default(),
            None,
            Utc::now(),
        );
        assert_eq!(quote.amount.cents(), 2000);
    }

    #[test]
    fn trip_final_payment() {
        let trip = TripQuote {
            base_price: cents(25_000),
            activities: vec![SelectedActivity {
                price: cents(3_500),
                option_prices: vec![],
            }],
            crew_discount: cents(2_000),
            is_crew: false,
            deposit: cents(5_000),
        };
        assert_eq!(trip.remaining().to_string(), "235.00");

        let crew = TripQuote { is_crew: true, ..trip.clone() };
        assert_eq!(crew.remaining().to_string(), "215.00");
    }

    #[test]
    fn trip_final_never_negative() {
        let trip = TripQuote {
            base_price: cents(1_000),
            activities: vec![],
            crew_discount: cents(5_000),
            is_crew: true,
            deposit: cents(5_000),
        };
        assert!(trip.remaining().is_zero());
    }

    #[test]
    fn coupon_applies_after_base() {
        let coupon = save10();
        let quote = calculate(
            cents(2000),
            &PricingBasis::Contribution { committee_member: false },
            &MembershipRates::default(),
            Some(&coupon),
            Utc::now(),
        );
        assert_eq!(quote.amount.to_string(), "18.00");
        assert_eq!(quote.base.cents(), 2000);
        assert_eq!(quote.coupon_id, Some(coupon.id));
    }

    #[test]
    fn exhausted_coupon_fails_open() {
        let mut coupon = save10();
        coupon.usage_limit = Some(1);
        coupon.usage_count = 1;
        let quote = calculate(
            cents(2000),
            &PricingBasis::Hint,
            &MembershipRates::default(),
            Some(&coupon),
            Utc::now(),
        );
        assert_eq!(quote.amount.cents(), 2000);
        assert_eq!(quote.coupon_id, None);
    }
}
