//! In-memory fast path for "is this login email taken?".
//!
//! A cuckoo filter answers definite negatives, a moka cache answers recent
//! positives, and anything else falls through to the `users` table. One
//! index belongs to one pool; `main` builds it next to the pool and shares
//! it through `web::Data`.

use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use moka::future::Cache;
use sqlx::SqlitePool;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

const FILTER_CAPACITY: usize = 10_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

pub struct AccountIndex {
    filter: RwLock<CuckooFilter<String>>,
    /// Emails known to be TAKEN.
    taken: Cache<String, ()>,
}

impl Default for AccountIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

impl AccountIndex {
    pub fn new() -> Self {
        Self {
            filter: RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)),
            taken: Cache::builder()
                .max_capacity(50_000)
                .time_to_live(Duration::from_secs(86_400))
                .build(),
        }
    }

    /// false positives possible, false negatives not
    fn might_exist(&self, email: &String) -> bool {
        self.filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(email)
    }

    /// Record a newly registered email in both layers.
    pub async fn mark_taken(&self, email: &str) {
        let email = normalize(email);
        self.filter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(&email);
        self.taken.insert(email, ()).await;
    }

    /// true  => email AVAILABLE
    /// false => email TAKEN
    pub async fn is_available(&self, email: &str, pool: &SqlitePool) -> Result<bool> {
        let email = normalize(email);

        if !self.might_exist(&email) {
            return Ok(true);
        }

        if self.taken.contains_key(&email) {
            return Ok(false);
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ? LIMIT 1)",
        )
        .bind(&email)
        .fetch_one(pool)
        .await?;

        if exists {
            self.taken.insert(email, ()).await;
        }

        Ok(!exists)
    }

    /// Load every registered email into the filter, streaming in batches.
    pub async fn warmup(&self, pool: &SqlitePool, batch_size: usize) -> Result<()> {
        let batch_size = batch_size.max(1);
        let mut stream = sqlx::query_as::<_, (String,)>("SELECT email FROM users").fetch(pool);

        let mut batch = Vec::with_capacity(batch_size);
        let mut total = 0usize;

        while let Some(row) = stream.next().await {
            let (email,) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;

            batch.push(normalize(&email));
            total += 1;

            if batch.len() == batch_size {
                self.insert_batch(&batch);
                batch.clear();
            }
        }

        if !batch.is_empty() {
            self.insert_batch(&batch);
        }

        tracing::info!(total, "Account index warmup complete");
        Ok(())
    }

    fn insert_batch(&self, emails: &[String]) {
        let mut filter = self.filter.write().unwrap_or_else(PoisonError::into_inner);

        for email in emails {
            filter.add(email);
        }
    }
}
