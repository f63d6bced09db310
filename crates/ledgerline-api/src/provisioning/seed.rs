//! Serialization of test/dev seed restores.
//!
//! Parallel test workers share one database; restoring seed data while
//! another worker provisions a tenant corrupts both. A session advisory
//! lock on a constant key serializes the restore phase. Production tenant
//! creation is single-coordinator and never takes this lock.

use diesel::prelude::*;
use diesel::sql_query;

use ledgerline_core::error::CoreError;

use crate::db::executor::map_db_error;

/// Constant advisory lock key for the seed-restore critical section.
const SEED_RESTORE_LOCK_KEY: i64 = 0x6c65_6467_6572;

/// Run `restore` while holding the seed-restore advisory lock.
///
/// The lock is session-scoped and released in all paths, including when
/// `restore` fails.
pub fn with_seed_lock<T, F>(conn: &mut PgConnection, restore: F) -> Result<T, CoreError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, CoreError>,
{
    sql_query(format!("SELECT pg_advisory_lock({})", SEED_RESTORE_LOCK_KEY))
        .execute(conn)
        .map_err(map_db_error)?;

    let result = restore(conn);

    let unlock = sql_query(format!(
        "SELECT pg_advisory_unlock({})",
        SEED_RESTORE_LOCK_KEY
    ))
    .execute(conn);
    if let Err(e) = unlock {
        log::error!("failed to release seed-restore lock: {}", e);
    }

    result
}
