use {
    crate::domain::{
        coupon::{Coupon, DiscountType},
        error::PipelineError,
        ports::CouponRedemption,
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    discount_type: String,
    discount_value: i64,
    usage_count: i64,
    usage_limit: Option<i64>,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    is_active: bool,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = PipelineError;

    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        Ok(Coupon {
            id: row.id,
            code: row.code,
            discount_type: DiscountType::try_from(row.discount_type.as_str())?,
            discount_value: row.discount_value,
            usage_count: row.usage_count,
            usage_limit: row.usage_limit,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
            is_active: row.is_active,
        })
    }
}

pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<Coupon>, PipelineError> {
    let row: Option<CouponRow> = sqlx::query_as(
        r#"
        SELECT id, code, discount_type, discount_value, usage_count, usage_limit,
               valid_from, valid_until, is_active
        FROM coupons
        WHERE lower(code) = lower($1)
        "#,
    )
    .bind(code.trim())
    .fetch_optional(pool)
    .await?;
    row.map(Coupon::try_from).transpose()
}

const INCREMENT: &str = r#"
    UPDATE coupons
    SET usage_count = usage_count + 1
    WHERE id = $1 AND (usage_limit IS NULL OR usage_count < usage_limit)
    RETURNING id
"#;

/// Flags the transaction's coupon as counted and bumps usage in one database
/// transaction, so a crash cannot count a coupon twice or lose the count.
pub async fn redeem_for_transaction(
    pool: &PgPool,
    transaction_id: Uuid,
    code: &str,
) -> Result<CouponRedemption, PipelineError> {
    let mut tx = pool.begin().await?;

    let flagged: Option<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE transactions
        SET coupon_redeemed = true, updated_at = now()
        WHERE id = $1 AND NOT coupon_redeemed
        RETURNING id
        "#,
    )
    .bind(transaction_id)
    .fetch_optional(&mut *tx)
    .await?;

    if flagged.is_none() {
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM transactions WHERE id = $1")
            .bind(transaction_id)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;
        return match exists {
            Some(_) => Ok(CouponRedemption::AlreadyRedeemed),
            None => Err(PipelineError::NotFound(format!(
                "transaction {transaction_id}"
            ))),
        };
    }

    let coupon_id: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM coupons WHERE lower(code) = lower($1)")
            .bind(code.trim())
            .fetch_optional(&mut *tx)
            .await?;

    let outcome = match coupon_id {
        None => CouponRedemption::UnknownCode,
        Some(id) => {
            let hit: Option<Uuid> = sqlx::query_scalar(INCREMENT)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            if hit.is_some() {
                CouponRedemption::Redeemed
            } else {
                CouponRedemption::Exhausted
            }
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Coupons are managed from the admin UI; this is used for seeding.
pub async fn insert(pool: &PgPool, coupon: &Coupon) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO coupons
            (id, code, discount_type, discount_value, usage_count, usage_limit,
             valid_from, valid_until, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(coupon.id)
    .bind(&coupon.code)
    .bind(coupon.discount_type.as_str())
    .bind(coupon.discount_value)
    .bind(coupon.usage_count)
    .bind(coupon.usage_limit)
    .bind(coupon.valid_from)
    .bind(coupon.valid_until)
    .bind(coupon.is_active)
    .execute(pool)
    .await?;
    Ok(())
}
