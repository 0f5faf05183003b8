use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    let migrations = [
        include_str!("../migrations/001_users.sql"),
        include_str!("../migrations/002_instruments.sql"),
        include_str!("../migrations/003_balances.sql"),
        include_str!("../migrations/004_orders.sql"),
        include_str!("../migrations/005_trades.sql"),
    ];
    for migration in migrations {
        sqlx::raw_sql(migration).execute(pool).await?;
    }
    Ok(())
}
