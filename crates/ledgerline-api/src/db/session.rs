use std::time::Duration;

use diesel::{
    r2d2::{ConnectionManager, Pool},
    PgConnection,
};

use ledgerline_core::error::CoreError;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Build the shared connection pool.
///
/// The checkout timeout doubles as part of the identity-resolution budget:
/// a resolver that cannot obtain a connection inside it fails the request
/// as unavailable rather than queueing indefinitely.
pub fn init_pool(database_url: &str, checkout_timeout: Duration) -> Result<DbPool, CoreError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(20)
        .min_idle(Some(2))
        .connection_timeout(checkout_timeout)
        .build(manager)
        .map_err(|e| CoreError::database(format!("failed to create connection pool: {}", e)))
}
