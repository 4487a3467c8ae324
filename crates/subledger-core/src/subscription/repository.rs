//! Subscription storage repository.

use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;

use super::model::{
    BillingCycle, Confidence, NewSubscription, Origin, Subscription, SubscriptionFilter,
    SubscriptionId, SubscriptionStatus, SubscriptionUpdate,
};
use crate::store::{Database, date_from_db, date_to_db, now, timestamp_from_db, timestamp_to_db};
use crate::{Error, Result, UserId};

const COLUMNS: &str = r"
    id, user_id, merchant, plan, amount_cents, currency, billing_cycle, category,
    first_billing_date, next_billing_date, trial_end_date, status, cancellation_date,
    access_end_date, confidence, origin, notes, cancellation_url, created_at, updated_at
";

/// Repository for tracked subscriptions.
#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    pool: SqlitePool,
}

impl SubscriptionRepository {
    /// Create a repository on a shared database.
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Create the subscriptions table.
    pub(crate) async fn initialize(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                merchant TEXT NOT NULL,
                plan TEXT,
                amount_cents INTEGER NOT NULL CHECK (amount_cents >= 0),
                currency TEXT NOT NULL,
                billing_cycle TEXT NOT NULL,
                category TEXT,
                first_billing_date TEXT,
                next_billing_date TEXT,
                trial_end_date TEXT,
                status TEXT NOT NULL,
                cancellation_date TEXT,
                access_end_date TEXT,
                confidence TEXT NOT NULL,
                origin TEXT NOT NULL,
                notes TEXT NOT NULL DEFAULT '',
                cancellation_url TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Insert a validated subscription.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if validation fails, or a database error.
    pub async fn create(&self, user_id: UserId, new: NewSubscription) -> Result<Subscription> {
        let new = new.validate()?;
        let mut conn = self.pool.acquire().await?;
        let id = insert_subscription(&mut *conn, user_id, &new).await?;
        drop(conn);
        debug!(user = %user_id, id = %id, merchant = %new.merchant, "Created subscription");
        self.get(user_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subscription {id}")))
    }

    /// Get one subscription owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, user_id: UserId, id: SubscriptionId) -> Result<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM subscriptions WHERE id = ? AND user_id = ?"
        ))
        .bind(id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_subscription))
    }

    /// List a user's subscriptions matching `filter`, ordered by merchant.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(
        &self,
        user_id: UserId,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Subscription>> {
        let mut query: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM subscriptions WHERE user_id = "));
        query.push_bind(user_id.0);

        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(category) = &filter.category {
            query
                .push(" AND LOWER(category) = LOWER(")
                .push_bind(category.clone())
                .push(")");
        }
        if let Some(origin) = filter.origin {
            query.push(" AND origin = ").push_bind(origin.as_str());
        }
        if let Some(merchant) = &filter.merchant {
            query
                .push(" AND merchant LIKE ")
                .push_bind(format!("%{merchant}%"));
        }
        query.push(" ORDER BY merchant COLLATE NOCASE, id");

        let rows = query.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_subscription).collect())
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the subscription does not exist for the
    /// user, [`Error::InvalidInput`] if the result is invalid, or a database error.
    pub async fn update(
        &self,
        user_id: UserId,
        id: SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription> {
        let mut subscription = self
            .get(user_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subscription {id}")))?;
        if update.is_empty() {
            return Ok(subscription);
        }
        update.apply(&mut subscription)?;
        subscription.updated_at = now();
        self.write(&subscription).await?;
        debug!(user = %user_id, id = %id, "Updated subscription");
        Ok(subscription)
    }

    /// Mark a subscription cancelled as of `on`.
    ///
    /// Access runs until the next billing date when that is still ahead,
    /// otherwise it ends on the cancellation date. No further charge is expected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the subscription does not exist for the user.
    pub async fn cancel(
        &self,
        user_id: UserId,
        id: SubscriptionId,
        on: NaiveDate,
    ) -> Result<Subscription> {
        let mut subscription = self
            .get(user_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subscription {id}")))?;
        if subscription.status == SubscriptionStatus::Cancelled {
            return Ok(subscription);
        }

        subscription.access_end_date = Some(
            subscription
                .next_billing_date
                .filter(|next| *next > on)
                .unwrap_or(on),
        );
        subscription.status = SubscriptionStatus::Cancelled;
        subscription.cancellation_date = Some(on);
        subscription.next_billing_date = None;
        subscription.updated_at = now();
        self.write(&subscription).await?;
        debug!(user = %user_id, id = %id, "Cancelled subscription");
        Ok(subscription)
    }

    /// Delete a subscription. Processed-message records that referenced it
    /// keep existing with the link cleared.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the subscription does not exist for the user.
    pub async fn delete(&self, user_id: UserId, id: SubscriptionId) -> Result<()> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = ? AND user_id = ?")
            .bind(id.0)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("subscription {id}")));
        }
        debug!(user = %user_id, id = %id, "Deleted subscription");
        Ok(())
    }

    async fn write(&self, s: &Subscription) -> Result<()> {
        sqlx::query(
            r"
            UPDATE subscriptions SET
                merchant = ?, plan = ?, amount_cents = ?, currency = ?, billing_cycle = ?,
                category = ?, first_billing_date = ?, next_billing_date = ?, trial_end_date = ?,
                status = ?, cancellation_date = ?, access_end_date = ?, notes = ?,
                cancellation_url = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            ",
        )
        .bind(&s.merchant)
        .bind(&s.plan)
        .bind(s.amount_cents)
        .bind(&s.currency)
        .bind(s.billing_cycle.as_str())
        .bind(&s.category)
        .bind(s.first_billing_date.map(date_to_db))
        .bind(s.next_billing_date.map(date_to_db))
        .bind(s.trial_end_date.map(date_to_db))
        .bind(s.status.as_str())
        .bind(s.cancellation_date.map(date_to_db))
        .bind(s.access_end_date.map(date_to_db))
        .bind(&s.notes)
        .bind(&s.cancellation_url)
        .bind(timestamp_to_db(s.updated_at))
        .bind(s.id.0)
        .bind(s.user_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Insert on an existing connection, so ingestion can share its transaction.
pub(crate) async fn insert_subscription(
    conn: &mut SqliteConnection,
    user_id: UserId,
    new: &NewSubscription,
) -> Result<SubscriptionId> {
    let created_at = timestamp_to_db(now());
    let result = sqlx::query(
        r"
        INSERT INTO subscriptions
            (user_id, merchant, plan, amount_cents, currency, billing_cycle, category,
             first_billing_date, next_billing_date, trial_end_date, status, confidence,
             origin, notes, cancellation_url, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(user_id.0)
    .bind(&new.merchant)
    .bind(&new.plan)
    .bind(new.amount_cents)
    .bind(&new.currency)
    .bind(new.billing_cycle.as_str())
    .bind(&new.category)
    .bind(new.first_billing_date.map(date_to_db))
    .bind(new.next_billing_date.map(date_to_db))
    .bind(new.trial_end_date.map(date_to_db))
    .bind(new.status.as_str())
    .bind(new.confidence.as_str())
    .bind(new.origin.as_str())
    .bind(&new.notes)
    .bind(&new.cancellation_url)
    .bind(&created_at)
    .bind(&created_at)
    .execute(conn)
    .await?;

    Ok(SubscriptionId(result.last_insert_rowid()))
}

fn row_to_subscription(row: &SqliteRow) -> Subscription {
    let billing_cycle: String = row.get("billing_cycle");
    let status: String = row.get("status");
    let confidence: String = row.get("confidence");
    let origin: String = row.get("origin");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Subscription {
        id: SubscriptionId(row.get("id")),
        user_id: UserId(row.get("user_id")),
        merchant: row.get("merchant"),
        plan: row.get("plan"),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        billing_cycle: BillingCycle::parse(&billing_cycle).unwrap_or_default(),
        category: row.get("category"),
        first_billing_date: date_from_db(row.get("first_billing_date")),
        next_billing_date: date_from_db(row.get("next_billing_date")),
        trial_end_date: date_from_db(row.get("trial_end_date")),
        status: SubscriptionStatus::parse(&status).unwrap_or_default(),
        cancellation_date: date_from_db(row.get("cancellation_date")),
        access_end_date: date_from_db(row.get("access_end_date")),
        confidence: Confidence::parse(&confidence).unwrap_or_default(),
        origin: Origin::parse(&origin).unwrap_or_default(),
        notes: row.get("notes"),
        cancellation_url: row.get("cancellation_url"),
        created_at: timestamp_from_db(&created_at).unwrap_or_else(Utc::now),
        updated_at: timestamp_from_db(&updated_at).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn repo() -> SubscriptionRepository {
        let db = Database::in_memory().await.unwrap();
        SubscriptionRepository::new(&db)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = repo().await;
        let user = UserId::new(1);
        let mut new = NewSubscription::manual("Spotify", 1199, "usd", BillingCycle::Monthly);
        new.category = Some("Music".to_string());

        let created = repo.create(user, new).await.unwrap();
        assert_eq!(created.merchant, "Spotify");
        assert_eq!(created.currency, "USD");
        assert_eq!(created.origin, Origin::Manual);
        assert_eq!(created.confidence, Confidence::High);

        let fetched = repo.get(user, created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_subscriptions_are_scoped_to_user() {
        let repo = repo().await;
        let owner = UserId::new(1);
        let other = UserId::new(2);
        let created = repo
            .create(owner, NewSubscription::manual("Hulu", 799, "USD", BillingCycle::Monthly))
            .await
            .unwrap();

        assert!(repo.get(other, created.id).await.unwrap().is_none());
        assert!(matches!(
            repo.delete(other, created.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(repo.list(other, &SubscriptionFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_with_filters() {
        let repo = repo().await;
        let user = UserId::new(1);
        let mut netflix = NewSubscription::manual("Netflix", 1549, "USD", BillingCycle::Monthly);
        netflix.category = Some("Streaming".into());
        let mut gym = NewSubscription::manual("Gym", 4000, "USD", BillingCycle::Monthly);
        gym.status = SubscriptionStatus::Paused;
        repo.create(user, netflix).await.unwrap();
        repo.create(user, gym).await.unwrap();

        let all = repo.list(user, &SubscriptionFilter::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|s| s.merchant.as_str()).collect::<Vec<_>>(),
            vec!["Gym", "Netflix"]
        );

        let streaming = SubscriptionFilter {
            category: Some("streaming".into()),
            ..SubscriptionFilter::default()
        };
        assert_eq!(repo.list(user, &streaming).await.unwrap().len(), 1);

        let paused = SubscriptionFilter {
            status: Some(SubscriptionStatus::Paused),
            ..SubscriptionFilter::default()
        };
        let paused = repo.list(user, &paused).await.unwrap();
        assert_eq!(paused.len(), 1);
        assert_eq!(paused[0].merchant, "Gym");

        let by_name = SubscriptionFilter {
            merchant: Some("flix".into()),
            ..SubscriptionFilter::default()
        };
        assert_eq!(repo.list(user, &by_name).await.unwrap()[0].merchant, "Netflix");
    }

    #[tokio::test]
    async fn test_update_partial() {
        let repo = repo().await;
        let user = UserId::new(1);
        let mut new = NewSubscription::manual("Dropbox", 1199, "USD", BillingCycle::Monthly);
        new.plan = Some("Plus".into());
        let created = repo.create(user, new).await.unwrap();

        let updated = repo
            .update(
                user,
                created.id,
                SubscriptionUpdate {
                    amount_cents: Some(11_988),
                    billing_cycle: Some(BillingCycle::Annual),
                    plan: Some(None),
                    ..SubscriptionUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.amount_cents, 11_988);
        assert_eq!(updated.billing_cycle, BillingCycle::Annual);
        assert_eq!(updated.plan, None);
        assert_eq!(updated.merchant, "Dropbox");

        let stored = repo.get(user, created.id).await.unwrap().unwrap();
        assert_eq!(stored, updated);

        let invalid = repo
            .update(
                user,
                created.id,
                SubscriptionUpdate {
                    amount_cents: Some(-5),
                    ..SubscriptionUpdate::default()
                },
            )
            .await;
        assert!(matches!(invalid, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_cancel_keeps_access_until_next_billing() {
        let repo = repo().await;
        let user = UserId::new(1);
        let mut new = NewSubscription::manual("Adobe", 5499, "USD", BillingCycle::Monthly);
        new.next_billing_date = Some(date(2026, 4, 15));
        let created = repo.create(user, new).await.unwrap();

        let cancelled = repo.cancel(user, created.id, date(2026, 4, 2)).await.unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert_eq!(cancelled.cancellation_date, Some(date(2026, 4, 2)));
        assert_eq!(cancelled.access_end_date, Some(date(2026, 4, 15)));
        assert_eq!(cancelled.next_billing_date, None);

        let again = repo.cancel(user, created.id, date(2026, 5, 1)).await.unwrap();
        assert_eq!(again.cancellation_date, Some(date(2026, 4, 2)));
    }

    #[tokio::test]
    async fn test_cancel_without_future_billing_ends_access_immediately() {
        let repo = repo().await;
        let user = UserId::new(1);
        let created = repo
            .create(user, NewSubscription::manual("Gym", 4000, "USD", BillingCycle::Monthly))
            .await
            .unwrap();

        let cancelled = repo.cancel(user, created.id, date(2026, 4, 2)).await.unwrap();
        assert_eq!(cancelled.access_end_date, Some(date(2026, 4, 2)));
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = repo().await;
        let user = UserId::new(1);
        let created = repo
            .create(user, NewSubscription::manual("Hulu", 799, "USD", BillingCycle::Monthly))
            .await
            .unwrap();

        repo.delete(user, created.id).await.unwrap();
        assert!(repo.get(user, created.id).await.unwrap().is_none());
        assert!(matches!(
            repo.delete(user, created.id).await,
            Err(Error::NotFound(_))
        ));
    }
}
