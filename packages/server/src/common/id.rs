use uuid::Uuid;

/// Generate a fresh database identifier.
pub fn db_id() -> Uuid {
    Uuid::new_v4()
}
