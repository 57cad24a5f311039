//! Runner de migraciones embebidas (`migrations/` de este crate).

use diesel::pg::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;

use crate::error::PersistenceError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub fn run_pending_migrations(conn: &mut PgConnection) -> Result<(), PersistenceError> {
    let applied = conn.run_pending_migrations(MIGRATIONS)
                      .map_err(|e| PersistenceError::Unknown(format!("migration error: {e}")))?;
    if !applied.is_empty() {
        info!("migrations applied count={}", applied.len());
    }
    Ok(())
}
