//! Pool construction, grounded on the teacher's lazy-connect `PgPool` setup
//! in `postgres_runtime_repository.rs`.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::schema;

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    schema::ensure_schema(&pool).await?;
    Ok(pool)
}
