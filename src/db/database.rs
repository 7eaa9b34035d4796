use crate::db::models::{
    AttemptInsert, AttemptStatus, ChatMenuRecord, FundsState, GenerationAttemptRow,
};
use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

const ATTEMPT_COLUMNS: &str = "correlation_id, user_id, chat_id, cost, exempt, status, funds_state, \
     style_code, artifact_ref, error, delivered_message_id, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginAttempt {
    Started(FundsState),
    InsufficientFunds { balance: i64 },
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let db = Database { pool };
        db.create_tables().await?;
        info!("Database tables created successfully");
        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Single pinned connection so every handle sees the same in-memory database.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_menus (\
                chat_id INTEGER PRIMARY KEY,\
                user_id INTEGER NOT NULL,\
                menu_message_id INTEGER,\
                screen_code TEXT NOT NULL,\
                updated_at TEXT NOT NULL\
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_balances (\
                user_id INTEGER PRIMARY KEY,\
                credits INTEGER NOT NULL DEFAULT 0,\
                updated_at TEXT NOT NULL\
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS generation_attempts (\
                correlation_id TEXT PRIMARY KEY,\
                user_id INTEGER NOT NULL,\
                chat_id INTEGER NOT NULL,\
                cost INTEGER NOT NULL,\
                exempt INTEGER NOT NULL DEFAULT 0,\
                status TEXT NOT NULL,\
                funds_state TEXT NOT NULL,\
                style_code TEXT,\
                artifact_ref TEXT,\
                error TEXT,\
                delivered_message_id INTEGER,\
                created_at TEXT NOT NULL,\
                updated_at TEXT NOT NULL\
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_generation_attempts_funds ON generation_attempts(funds_state);",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_generation_attempts_user ON generation_attempts(user_id);",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get_chat_menu(&self, chat_id: i64) -> Result<Option<ChatMenuRecord>> {
        let row = sqlx::query_as::<_, ChatMenuRecord>(
            "SELECT chat_id, user_id, menu_message_id, screen_code, updated_at \
             FROM chat_menus WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn save_chat_menu(
        &self,
        chat_id: i64,
        user_id: i64,
        menu_message_id: Option<i64>,
        screen_code: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_menus (chat_id, user_id, menu_message_id, screen_code, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(chat_id) DO UPDATE SET \
             user_id = excluded.user_id, \
             menu_message_id = excluded.menu_message_id, \
             screen_code = excluded.screen_code, \
             updated_at = excluded.updated_at",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(menu_message_id)
        .bind(screen_code)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Creates the funds account with the starting allowance. Existing balances are left alone.
    pub async fn ensure_user(&self, user_id: i64, starting_credits: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO user_balances (user_id, credits, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(starting_credits)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_balance(&self, user_id: i64) -> Result<i64> {
        let credits: Option<i64> =
            sqlx::query_scalar("SELECT credits FROM user_balances WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(credits.unwrap_or(0))
    }

    /// Conditional debit: succeeds only when the balance covers `amount`.
    pub async fn debit(&self, user_id: i64, amount: i64) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        debit_on(&mut conn, user_id, amount).await
    }

    pub async fn credit(&self, user_id: i64, amount: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        credit_on(&mut conn, user_id, amount).await
    }

    /// Debits the cost (unless exempt) and records the pending attempt in one transaction.
    pub async fn begin_attempt(&self, attempt: &AttemptInsert) -> Result<BeginAttempt> {
        let mut tx = self.pool.begin().await?;

        let funds_state = if attempt.exempt {
            FundsState::Exempt
        } else {
            if attempt.cost > 0 && !debit_on(&mut tx, attempt.user_id, attempt.cost).await? {
                tx.rollback().await?;
                let balance = self.get_balance(attempt.user_id).await?;
                return Ok(BeginAttempt::InsufficientFunds { balance });
            }
            FundsState::Debited
        };

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO generation_attempts \
             (correlation_id, user_id, chat_id, cost, exempt, status, funds_state, style_code, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&attempt.correlation_id)
        .bind(attempt.user_id)
        .bind(attempt.chat_id)
        .bind(attempt.cost)
        .bind(attempt.exempt)
        .bind(AttemptStatus::Pending.as_str())
        .bind(funds_state.as_str())
        .bind(&attempt.style_code)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(BeginAttempt::Started(funds_state))
    }

    pub async fn record_attempt_outcome(
        &self,
        correlation_id: &str,
        status: AttemptStatus,
        artifact_ref: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE generation_attempts \
             SET status = ?, artifact_ref = COALESCE(?, artifact_ref), error = COALESCE(?, error), updated_at = ? \
             WHERE correlation_id = ?",
        )
        .bind(status.as_str())
        .bind(artifact_ref)
        .bind(error)
        .bind(Utc::now())
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// First writer wins; `false` means the attempt already had a delivered message.
    pub async fn mark_attempt_delivered(
        &self,
        correlation_id: &str,
        delivered_message_id: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE generation_attempts \
             SET delivered_message_id = ?, status = ?, updated_at = ? \
             WHERE correlation_id = ? AND delivered_message_id IS NULL",
        )
        .bind(delivered_message_id)
        .bind(AttemptStatus::Succeeded.as_str())
        .bind(Utc::now())
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn settle_attempt(&self, correlation_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE generation_attempts SET funds_state = ?, updated_at = ? \
             WHERE correlation_id = ? AND funds_state = ?",
        )
        .bind(FundsState::Settled.as_str())
        .bind(Utc::now())
        .bind(correlation_id)
        .bind(FundsState::Debited.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Flips `debited -> refunded` and credits the cost back in one transaction.
    /// Returns `false` when the attempt was not in the debited state, so a refund happens at most once.
    pub async fn refund_attempt(&self, correlation_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT user_id, cost FROM generation_attempts WHERE correlation_id = ? AND funds_state = ?",
        )
        .bind(correlation_id)
        .bind(FundsState::Debited.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((user_id, cost)) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        let flipped = sqlx::query(
            "UPDATE generation_attempts SET funds_state = ?, updated_at = ? \
             WHERE correlation_id = ? AND funds_state = ?",
        )
        .bind(FundsState::Refunded.as_str())
        .bind(Utc::now())
        .bind(correlation_id)
        .bind(FundsState::Debited.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if flipped != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        if cost > 0 {
            credit_on(&mut tx, user_id, cost).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    pub async fn get_attempt(&self, correlation_id: &str) -> Result<Option<GenerationAttemptRow>> {
        let query = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM generation_attempts WHERE correlation_id = ?"
        );
        let row = sqlx::query_as::<_, GenerationAttemptRow>(&query)
            .bind(correlation_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Attempts whose debit was never resolved, e.g. the process stopped mid-generation.
    pub async fn interrupted_attempts(&self) -> Result<Vec<GenerationAttemptRow>> {
        let query = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM generation_attempts \
             WHERE funds_state = ? ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, GenerationAttemptRow>(&query)
            .bind(FundsState::Debited.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

async fn debit_on(conn: &mut SqliteConnection, user_id: i64, amount: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE user_balances SET credits = credits - ?, updated_at = ? \
         WHERE user_id = ? AND credits >= ?",
    )
    .bind(amount)
    .bind(Utc::now())
    .bind(user_id)
    .bind(amount)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn credit_on(conn: &mut SqliteConnection, user_id: i64, amount: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO user_balances (user_id, credits, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(user_id) DO UPDATE SET \
         credits = credits + excluded.credits, \
         updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(amount)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}
