use crate::errors::AppError;
use crate::models::{
    Country, CreditApplication, CreditApplicationEvent, DocumentUpload, Status, ValidationEntry,
};
use bigdecimal::BigDecimal;
use sqlx::types::Json;
use sqlx::PgPool;

/// Fields required to create an application. Validation happens before this
/// struct is built; the store assumes well-formed input.
#[derive(Debug)]
pub struct NewApplication {
    pub country: Country,
    pub full_name: String,
    pub requested_amount: BigDecimal,
    pub status: Status,
    pub user_id: i64,
    pub document: Option<DocumentUpload>,
}

/// A confirmed status transition. Only produced when the status actually
/// changed; a same-status rewrite yields nothing, so notifications cannot
/// re-fire.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub application_id: i64,
    pub user_id: i64,
    pub old_status: String,
    pub new_status: String,
}

/// Storage operations for credit applications, keyed by (id, country).
///
/// Mutations that read-modify-write shared state (validation_result, status)
/// take a per-application Postgres advisory lock so concurrent rule writers
/// cannot clobber each other.
#[derive(Clone)]
pub struct ApplicationStore {
    pool: PgPool,
}

impl ApplicationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: &NewApplication) -> Result<CreditApplication, AppError> {
        let (filename, content) = match &new.document {
            Some(doc) => (Some(doc.filename.as_str()), Some(doc.content.as_bytes())),
            None => (None, None),
        };

        let app = sqlx::query_as::<_, CreditApplication>(
            r#"
            INSERT INTO credit_applications
                (country, full_name, requested_amount, application_date, status,
                 validation_result, identity_document_filename, identity_document_content,
                 user_id, created_at, updated_at)
            VALUES ($1, $2, $3, CURRENT_DATE, $4, '[]'::jsonb, $5, $6, $7, now(), now())
            RETURNING *
            "#,
        )
        .bind(new.country.as_str())
        .bind(&new.full_name)
        .bind(&new.requested_amount)
        .bind(new.status.as_str())
        .bind(filename)
        .bind(content)
        .bind(new.user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(app)
    }

    pub async fn find(
        &self,
        id: i64,
        country: Country,
    ) -> Result<Option<CreditApplication>, AppError> {
        let app = sqlx::query_as::<_, CreditApplication>(
            "SELECT * FROM credit_applications WHERE id = $1 AND country = $2",
        )
        .bind(id)
        .bind(country.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(app)
    }

    /// Fetches the application or fails with not-found.
    pub async fn fetch(&self, id: i64, country: Country) -> Result<CreditApplication, AppError> {
        self.find(id, country).await?.ok_or_else(|| {
            AppError::NotFound(format!("Credit application {}/{} not found", id, country))
        })
    }

    /// Best-effort fallback lookup by declared full name and country, used
    /// by webhook resolution when no reference id is available. Unreliable
    /// under duplicate names; returns the first match.
    pub async fn find_by_full_name(
        &self,
        full_name: &str,
        country: Country,
    ) -> Result<Option<CreditApplication>, AppError> {
        let app = sqlx::query_as::<_, CreditApplication>(
            "SELECT * FROM credit_applications WHERE full_name = $1 AND country = $2 LIMIT 1",
        )
        .bind(full_name)
        .bind(country.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(app)
    }

    pub async fn list(
        &self,
        country: Option<&str>,
        status: Option<&str>,
        page: i64,
        per_page: i64,
    ) -> Result<Vec<CreditApplication>, AppError> {
        let offset = (page - 1) * per_page;
        let apps = sqlx::query_as::<_, CreditApplication>(
            r#"
            SELECT * FROM credit_applications
            WHERE ($1::varchar IS NULL OR country = $1)
              AND ($2::varchar IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(country)
        .bind(status)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(apps)
    }

    pub async fn count(
        &self,
        country: Option<&str>,
        status: Option<&str>,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM credit_applications
            WHERE ($1::varchar IS NULL OR country = $1)
              AND ($2::varchar IS NULL OR status = $2)
            "#,
        )
        .bind(country)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Upserts one rule result into validation_result under the
    /// per-application advisory lock: reload latest, merge this entry,
    /// write back. An existing entry for the rule is updated in place;
    /// a new rule name is appended. Entries are never removed.
    pub async fn upsert_validation_entry(
        &self,
        id: i64,
        country: Country,
        name: &str,
        result: bool,
    ) -> Result<Vec<ValidationEntry>, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(lock_key(id, country))
            .execute(&mut *tx)
            .await?;

        let current: Option<Json<Vec<ValidationEntry>>> = sqlx::query_scalar(
            "SELECT validation_result FROM credit_applications WHERE id = $1 AND country = $2",
        )
        .bind(id)
        .bind(country.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(Json(mut entries)) = current else {
            return Err(AppError::NotFound(format!(
                "Credit application {}/{} not found",
                id, country
            )));
        };

        match entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.result = result,
            None => entries.push(ValidationEntry {
                name: name.to_string(),
                result,
            }),
        }

        sqlx::query(
            r#"
            UPDATE credit_applications
            SET validation_result = $3, updated_at = now()
            WHERE id = $1 AND country = $2
            "#,
        )
        .bind(id)
        .bind(country.as_str())
        .bind(Json(&entries))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entries)
    }

    /// Writes the status if and only if it differs from the current value.
    /// Returns the confirmed change, or None for a no-op rewrite. Every
    /// broadcast decision hangs off this return value.
    pub async fn update_status(
        &self,
        id: i64,
        country: Country,
        status: Status,
    ) -> Result<Option<StatusChange>, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(lock_key(id, country))
            .execute(&mut *tx)
            .await?;

        let current: Option<(String, i64)> = sqlx::query_as(
            "SELECT status, user_id FROM credit_applications WHERE id = $1 AND country = $2",
        )
        .bind(id)
        .bind(country.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((old_status, user_id)) = current else {
            return Err(AppError::NotFound(format!(
                "Credit application {}/{} not found",
                id, country
            )));
        };

        if old_status == status.as_str() {
            return Ok(None);
        }

        sqlx::query(
            r#"
            UPDATE credit_applications
            SET status = $3, updated_at = now()
            WHERE id = $1 AND country = $2
            "#,
        )
        .bind(id)
        .bind(country.as_str())
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(StatusChange {
            application_id: id,
            user_id,
            old_status,
            new_status: status.as_str().to_string(),
        }))
    }

    /// Persists an inbound banking payload verbatim and, when present, the
    /// extracted income figure.
    pub async fn store_banking_data(
        &self,
        id: i64,
        country: Country,
        payload: &serde_json::Value,
        monthly_income: Option<&BigDecimal>,
    ) -> Result<(), AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE credit_applications
            SET banking_data = $3,
                monthly_income = COALESCE($4, monthly_income),
                updated_at = now()
            WHERE id = $1 AND country = $2
            "#,
        )
        .bind(id)
        .bind(country.as_str())
        .bind(payload)
        .bind(monthly_income)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Credit application {}/{} not found",
                id, country
            )));
        }
        Ok(())
    }

    /// Admin-only physical delete, cascading to the application's audit
    /// events. The change-capture trigger appends the final 'deleted' event
    /// after the row goes away.
    pub async fn delete(&self, id: i64, country: Country) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM credit_application_events WHERE credit_application_id = $1 AND country = $2",
        )
        .bind(id)
        .bind(country.as_str())
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM credit_applications WHERE id = $1 AND country = $2")
            .bind(id)
            .bind(country.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }

    /// Per-country counts grouped by status, for aggregate reporting.
    pub async fn status_counts(
        &self,
        countries: &[Country],
    ) -> Result<Vec<(String, String, i64)>, AppError> {
        let names: Vec<String> = countries.iter().map(|c| c.as_str().to_string()).collect();
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT country, status, COUNT(*) FROM credit_applications
            WHERE country = ANY($1)
            GROUP BY country, status
            "#,
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Audit trail for one application, newest first.
    pub async fn list_events(
        &self,
        id: i64,
        country: Country,
    ) -> Result<Vec<CreditApplicationEvent>, AppError> {
        let events = sqlx::query_as::<_, CreditApplicationEvent>(
            r#"
            SELECT * FROM credit_application_events
            WHERE credit_application_id = $1 AND country = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(id)
        .bind(country.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}

/// Advisory-lock key scoping a (country, id) pair.
fn lock_key(id: i64, country: Country) -> String {
    format!("credit_application:{}:{}", country.as_str(), id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_distinct_across_countries() {
        assert_ne!(
            lock_key(42, Country::Mexico),
            lock_key(42, Country::Portugal)
        );
        assert_ne!(lock_key(1, Country::Mexico), lock_key(2, Country::Mexico));
    }
}
