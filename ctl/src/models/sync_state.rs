use crate::schema::sync_state;
use chrono::prelude::*;
use diesel::prelude::*;
use forgectl_common::errors::*;
use serde::Serialize;

/// Append-only log of repository sync runs, newest row wins.
#[derive(Identifiable, Queryable, Serialize, PartialEq, Debug, Clone)]
#[diesel(table_name = sync_state)]
pub struct SyncState {
    pub id: i64,
    pub repo_name: String,
    pub last_commit_hash: Option<String>,
    pub last_sync_time: NaiveDateTime,
    pub packages_synced: i32,
}

impl SyncState {
    pub fn last(my_repo: &str, connection: &mut SqliteConnection) -> Result<Option<SyncState>> {
        use crate::schema::sync_state::dsl::*;
        let state = sync_state
            .filter(repo_name.eq(my_repo))
            .order_by(last_sync_time.desc())
            .first::<SyncState>(connection)
            .optional()?;
        Ok(state)
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = sync_state)]
pub struct NewSyncState {
    pub repo_name: String,
    pub last_commit_hash: Option<String>,
    pub last_sync_time: NaiveDateTime,
    pub packages_synced: i32,
}

impl NewSyncState {
    pub fn new(repo_name: &str, commit_hash: Option<&str>, packages_synced: i32) -> NewSyncState {
        NewSyncState {
            repo_name: repo_name.to_string(),
            last_commit_hash: commit_hash.map(String::from),
            last_sync_time: Utc::now().naive_utc(),
            packages_synced,
        }
    }

    pub fn insert(&self, connection: &mut SqliteConnection) -> Result<()> {
        diesel::insert_into(sync_state::table)
            .values(self)
            .execute(connection)
            .context("Failed to save sync state")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn newest_sync_record_wins() {
        let mut conn = db::setup(":memory:").unwrap();

        assert!(SyncState::last("soarpkgs", &mut conn).unwrap().is_none());

        NewSyncState::new("soarpkgs", Some("abc123"), 10)
            .insert(&mut conn)
            .unwrap();
        let mut newer = NewSyncState::new("soarpkgs", Some("def456"), 12);
        newer.last_sync_time += chrono::Duration::seconds(1);
        newer.insert(&mut conn).unwrap();

        let last = SyncState::last("soarpkgs", &mut conn).unwrap().unwrap();
        assert_eq!(last.last_commit_hash.as_deref(), Some("def456"));
        assert_eq!(last.packages_synced, 12);
    }
}
