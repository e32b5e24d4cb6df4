//! Single-writer election through a Postgres session advisory lock.

use sqlx::Postgres;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPool;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::application::repos::RepoError;
use crate::cache::LeadershipToken;

use super::map_sqlx_error;

/// Holds the advisory lock on a dedicated pooled connection for as long as
/// this process is the leader.
pub struct PgLeaderElection {
    key: i64,
    connection: Mutex<Option<PoolConnection<Postgres>>>,
    token: LeadershipToken,
}

impl PgLeaderElection {
    /// Try once to take the lock; losing the race yields a denied token.
    pub async fn acquire(pool: &PgPool, key: i64) -> Result<Self, RepoError> {
        let mut connection = pool.acquire().await.map_err(map_sqlx_error)?;
        let granted: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *connection)
            .await
            .map_err(map_sqlx_error)?;

        let token = if granted {
            info!(key, "Acquired snapshot file leadership");
            LeadershipToken::granted()
        } else {
            info!(key, "Another process holds snapshot file leadership");
            LeadershipToken::denied()
        };

        Ok(Self {
            key,
            connection: Mutex::new(granted.then_some(connection)),
            token,
        })
    }

    pub fn token(&self) -> LeadershipToken {
        self.token.clone()
    }

    /// Revoke the token and unlock. Safe to call more than once.
    pub async fn release(&self) -> Result<(), RepoError> {
        self.token.revoke();
        let Some(mut connection) = self.connection.lock().await.take() else {
            return Ok(());
        };
        let unlocked: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *connection)
            .await
            .map_err(map_sqlx_error)?;
        if !unlocked {
            warn!(key = self.key, "Advisory lock was not held at release");
        }
        Ok(())
    }
}
