use crate::schema::builds;
use chrono::prelude::*;
use diesel::define_sql_function;
use diesel::prelude::*;
use forgectl_common::errors::*;
use forgectl_common::{BuildStatus, Statistics};
use serde::Serialize;

define_sql_function! {
    fn last_insert_rowid() -> BigInt;
}

#[derive(Identifiable, Queryable, Serialize, PartialEq, Debug, Clone)]
#[diesel(table_name = builds)]
pub struct Build {
    pub id: i64,
    pub pkg_name: String,
    pub pkg_id: String,
    pub recipe_path: String,
    pub status: String,
    pub priority: i32,
    pub arch: String,
    pub force_build: bool,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub duration_seconds: Option<i64>,
    pub error_message: Option<String>,
    pub build_log_url: Option<String>,
}

impl Build {
    pub fn get_id(my_id: i64, connection: &mut SqliteConnection) -> Result<Build> {
        use crate::schema::builds::dsl::*;
        let build = builds
            .filter(id.eq(my_id))
            .first::<Build>(connection)
            .with_context(|| format!("Failed to find build {}", my_id))?;
        Ok(build)
    }

    pub fn status(&self) -> Result<BuildStatus> {
        self.status
            .parse::<BuildStatus>()
            .map_err(|_| anyhow!("Unknown build status: {:?}", self.status))
    }

    /// Claim the next queued build for an architecture and move it to
    /// `building`. Dispatch order is highest priority first, oldest first
    /// within a priority.
    ///
    /// The claim is race-free under concurrent workers: the status-guarded
    /// update only succeeds for one claimant, everybody else moves on to the
    /// next candidate.
    pub fn claim_next(my_arch: &str, connection: &mut SqliteConnection) -> Result<Option<Build>> {
        use crate::schema::builds::dsl::*;

        loop {
            let candidate = builds
                .filter(status.eq(BuildStatus::Queued.as_ref()))
                .filter(arch.eq(my_arch))
                .order_by((priority.desc(), created_at.asc()))
                .first::<Build>(connection)
                .optional()?;

            let Some(candidate) = candidate else {
                return Ok(None);
            };

            let now = Utc::now().naive_utc();
            let claimed = diesel::update(
                builds
                    .filter(id.eq(candidate.id))
                    .filter(status.eq(BuildStatus::Queued.as_ref())),
            )
            .set((
                status.eq(BuildStatus::Building.as_ref()),
                started_at.eq(now),
            ))
            .execute(connection)?;

            if claimed == 1 {
                return Self::get_id(candidate.id, connection).map(Some);
            }
            // lost the race for this row, try the next one
        }
    }

    /// Apply a status transition, stamping `started_at` on entry to
    /// `building` and `completed_at`/`duration_seconds` on entry to any
    /// terminal status. Illegal transitions are rejected.
    pub fn transition(
        my_id: i64,
        next: BuildStatus,
        error: Option<&str>,
        connection: &mut SqliteConnection,
    ) -> Result<Build> {
        use crate::schema::builds::dsl::*;

        let build = Self::get_id(my_id, connection)?;
        let current = build.status()?;
        if !current.can_transition_to(next) {
            bail!(
                "Illegal status transition for build {}: {} -> {}",
                my_id,
                current,
                next
            );
        }

        let now = Utc::now().naive_utc();
        if next == BuildStatus::Building {
            diesel::update(builds.filter(id.eq(my_id)))
                .set((
                    status.eq(next.as_ref()),
                    started_at.eq(now),
                    error_message.eq(error),
                ))
                .execute(connection)?;
        } else {
            let duration = build.started_at.map(|t| (now - t).num_seconds());
            diesel::update(builds.filter(id.eq(my_id)))
                .set((
                    status.eq(next.as_ref()),
                    completed_at.eq(now),
                    duration_seconds.eq(duration),
                    error_message.eq(error),
                ))
                .execute(connection)?;
        }

        Self::get_id(my_id, connection)
    }

    pub fn cancel(my_id: i64, connection: &mut SqliteConnection) -> Result<Build> {
        Self::transition(
            my_id,
            BuildStatus::Cancelled,
            Some("Cancelled by user"),
            connection,
        )
    }

    pub fn list(
        status_filter: Option<BuildStatus>,
        limit: Option<i64>,
        connection: &mut SqliteConnection,
    ) -> Result<Vec<Build>> {
        use crate::schema::builds::dsl::*;

        let mut query = builds.order_by(created_at.desc()).into_boxed();
        if let Some(wanted) = status_filter {
            query = query.filter(status.eq(wanted.as_ref().to_owned()));
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let results = query.load::<Build>(connection)?;
        Ok(results)
    }

    pub fn get_by_package(my_name: &str, connection: &mut SqliteConnection) -> Result<Vec<Build>> {
        use crate::schema::builds::dsl::*;
        let results = builds
            .filter(pkg_name.eq(my_name))
            .order_by(created_at.desc())
            .load::<Build>(connection)?;
        Ok(results)
    }

    pub fn stats(connection: &mut SqliteConnection) -> Result<Statistics> {
        use crate::schema::builds::dsl::*;

        let total = builds.count().get_result::<i64>(connection)?;

        let mut stats = Statistics {
            total_builds: total,
            queued: count_status(BuildStatus::Queued, connection)?,
            building: count_status(BuildStatus::Building, connection)?,
            succeeded: count_status(BuildStatus::Succeeded, connection)?,
            failed: count_status(BuildStatus::Failed, connection)?,
            cancelled: count_status(BuildStatus::Cancelled, connection)?,
            ..Default::default()
        };

        let durations = builds
            .select(duration_seconds)
            .filter(duration_seconds.is_not_null())
            .load::<Option<i64>>(connection)?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        if !durations.is_empty() {
            stats.avg_duration_seconds =
                durations.iter().sum::<i64>() as f64 / durations.len() as f64;
        }

        if stats.succeeded + stats.failed > 0 {
            stats.success_rate_percent =
                stats.succeeded as f64 / (stats.succeeded + stats.failed) as f64 * 100.0;
        }

        Ok(stats)
    }

    pub fn clear(
        status_filter: Option<BuildStatus>,
        connection: &mut SqliteConnection,
    ) -> Result<usize> {
        use crate::schema::builds::dsl::*;

        let deleted = match status_filter {
            Some(wanted) => {
                diesel::delete(builds.filter(status.eq(wanted.as_ref()))).execute(connection)?
            }
            None => diesel::delete(builds).execute(connection)?,
        };
        Ok(deleted)
    }
}

fn count_status(wanted: BuildStatus, connection: &mut SqliteConnection) -> Result<i64> {
    use crate::schema::builds::dsl::*;
    let count = builds
        .filter(status.eq(wanted.as_ref()))
        .count()
        .get_result::<i64>(connection)?;
    Ok(count)
}

#[derive(Insertable, Serialize, PartialEq, Debug, Clone)]
#[diesel(table_name = builds)]
pub struct NewBuild {
    pub pkg_name: String,
    pub pkg_id: String,
    pub recipe_path: String,
    pub status: String,
    pub priority: i32,
    pub arch: String,
    pub force_build: bool,
    pub created_at: NaiveDateTime,
}

impl NewBuild {
    pub fn new(
        pkg_name: &str,
        pkg_id: &str,
        recipe_path: &str,
        arch: &str,
        priority: i32,
        force_build: bool,
    ) -> NewBuild {
        NewBuild {
            pkg_name: pkg_name.to_string(),
            pkg_id: pkg_id.to_string(),
            recipe_path: recipe_path.to_string(),
            status: BuildStatus::Queued.to_string(),
            priority,
            arch: arch.to_string(),
            force_build,
            created_at: Utc::now().naive_utc(),
        }
    }

    pub fn insert(&self, connection: &mut SqliteConnection) -> Result<i64> {
        let id = connection
            .transaction::<i64, Error, _>(|connection| {
                diesel::insert_into(builds::table)
                    .values(self)
                    .execute(connection)?;

                let rows = diesel::select(last_insert_rowid()).load::<i64>(connection)?;
                if let Some(id) = rows.first() {
                    Ok(*id)
                } else {
                    bail!("Failed to get last insert id")
                }
            })
            .context("Failed to insert build into queue")?;

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn connection() -> SqliteConnection {
        db::setup(":memory:").unwrap()
    }

    fn enqueue(conn: &mut SqliteConnection, pkg: &str, arch: &str, priority: i32) -> i64 {
        NewBuild::new(pkg, &format!("dev.example.{}", pkg), &format!("binaries/{}/static.yaml", pkg), arch, priority, false)
            .insert(conn)
            .unwrap()
    }

    #[test]
    fn enqueued_build_starts_queued() {
        let mut conn = connection();
        let id = enqueue(&mut conn, "btop", "x86_64-Linux", 10);

        let build = Build::get_id(id, &mut conn).unwrap();
        assert_eq!(build.status().unwrap(), BuildStatus::Queued);
        assert!(build.started_at.is_none());
        assert!(build.completed_at.is_none());
    }

    #[test]
    fn claim_respects_priority_then_age() {
        let mut conn = connection();
        let low_old = enqueue(&mut conn, "one", "aarch64-Linux", 10);
        let high = enqueue(&mut conn, "two", "aarch64-Linux", 100);
        let low_new = enqueue(&mut conn, "three", "aarch64-Linux", 10);

        // make row ordering unambiguous even with identical timestamps
        use crate::schema::builds::dsl::*;
        diesel::update(builds.filter(id.eq(low_old)))
            .set(created_at.eq(Utc::now().naive_utc() - chrono::Duration::seconds(10)))
            .execute(&mut conn)
            .unwrap();
        diesel::update(builds.filter(id.eq(high)))
            .set(created_at.eq(Utc::now().naive_utc() - chrono::Duration::seconds(5)))
            .execute(&mut conn)
            .unwrap();

        let first = Build::claim_next("aarch64-Linux", &mut conn).unwrap().unwrap();
        let second = Build::claim_next("aarch64-Linux", &mut conn).unwrap().unwrap();
        let third = Build::claim_next("aarch64-Linux", &mut conn).unwrap().unwrap();

        assert_eq!(first.id, high);
        assert_eq!(second.id, low_old);
        assert_eq!(third.id, low_new);
        assert!(Build::claim_next("aarch64-Linux", &mut conn).unwrap().is_none());
    }

    #[test]
    fn claim_is_scoped_to_architecture() {
        let mut conn = connection();
        enqueue(&mut conn, "btop", "x86_64-Linux", 10);

        assert!(Build::claim_next("riscv64-Linux", &mut conn).unwrap().is_none());
        assert!(Build::claim_next("x86_64-Linux", &mut conn).unwrap().is_some());
    }

    #[test]
    fn claim_stamps_started_at() {
        let mut conn = connection();
        let id = enqueue(&mut conn, "btop", "x86_64-Linux", 10);

        let build = Build::claim_next("x86_64-Linux", &mut conn).unwrap().unwrap();
        assert_eq!(build.id, id);
        assert_eq!(build.status().unwrap(), BuildStatus::Building);
        assert!(build.started_at.is_some());
    }

    #[test]
    fn a_build_is_never_claimed_twice() {
        let mut conn = connection();
        enqueue(&mut conn, "btop", "x86_64-Linux", 10);

        let first = Build::claim_next("x86_64-Linux", &mut conn).unwrap();
        let second = Build::claim_next("x86_64-Linux", &mut conn).unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn terminal_transition_stamps_completion() {
        let mut conn = connection();
        let id = enqueue(&mut conn, "btop", "x86_64-Linux", 10);

        Build::claim_next("x86_64-Linux", &mut conn).unwrap().unwrap();
        let build = Build::transition(id, BuildStatus::Succeeded, None, &mut conn).unwrap();

        assert_eq!(build.status().unwrap(), BuildStatus::Succeeded);
        let started = build.started_at.unwrap();
        let completed = build.completed_at.unwrap();
        assert!(completed >= started);
        assert!(started >= build.created_at);
        assert_eq!(
            build.duration_seconds.unwrap(),
            (completed - started).num_seconds()
        );
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut conn = connection();
        let id = enqueue(&mut conn, "btop", "x86_64-Linux", 10);

        // queued -> succeeded is not a legal edge
        assert!(Build::transition(id, BuildStatus::Succeeded, None, &mut conn).is_err());

        Build::claim_next("x86_64-Linux", &mut conn).unwrap().unwrap();
        Build::transition(id, BuildStatus::Failed, Some("boom"), &mut conn).unwrap();

        // terminals are absorbing
        assert!(Build::transition(id, BuildStatus::Building, None, &mut conn).is_err());
        assert!(Build::transition(id, BuildStatus::Succeeded, None, &mut conn).is_err());
    }

    #[test]
    fn cancel_only_prevents_unclaimed_builds() {
        let mut conn = connection();
        let id = enqueue(&mut conn, "btop", "x86_64-Linux", 10);

        let build = Build::cancel(id, &mut conn).unwrap();
        assert_eq!(build.status().unwrap(), BuildStatus::Cancelled);
        assert_eq!(build.error_message.as_deref(), Some("Cancelled by user"));
        assert!(build.started_at.is_none());

        assert!(Build::claim_next("x86_64-Linux", &mut conn).unwrap().is_none());
    }

    #[test]
    fn failed_builds_keep_their_error_message() {
        let mut conn = connection();
        let id = enqueue(&mut conn, "btop", "x86_64-Linux", 10);

        Build::claim_next("x86_64-Linux", &mut conn).unwrap().unwrap();
        let build =
            Build::transition(id, BuildStatus::Failed, Some("driver exited with 1"), &mut conn)
                .unwrap();
        assert_eq!(build.error_message.as_deref(), Some("driver exited with 1"));
    }

    #[test]
    fn list_filters_by_status_and_limit() {
        let mut conn = connection();
        for i in 0..5 {
            enqueue(&mut conn, &format!("pkg{}", i), "x86_64-Linux", 10);
        }
        Build::claim_next("x86_64-Linux", &mut conn).unwrap().unwrap();

        assert_eq!(Build::list(None, None, &mut conn).unwrap().len(), 5);
        assert_eq!(
            Build::list(Some(BuildStatus::Queued), None, &mut conn).unwrap().len(),
            4
        );
        assert_eq!(Build::list(None, Some(2), &mut conn).unwrap().len(), 2);
    }

    #[test]
    fn history_survives_until_cleared() {
        let mut conn = connection();
        let id = enqueue(&mut conn, "btop", "x86_64-Linux", 10);
        Build::claim_next("x86_64-Linux", &mut conn).unwrap().unwrap();
        Build::transition(id, BuildStatus::Failed, Some("boom"), &mut conn).unwrap();

        assert_eq!(Build::get_by_package("btop", &mut conn).unwrap().len(), 1);

        let deleted = Build::clear(Some(BuildStatus::Failed), &mut conn).unwrap();
        assert_eq!(deleted, 1);
        assert!(Build::get_by_package("btop", &mut conn).unwrap().is_empty());
    }

    #[test]
    fn stats_counts_by_status() {
        let mut conn = connection();
        enqueue(&mut conn, "a", "x86_64-Linux", 10);
        enqueue(&mut conn, "b", "x86_64-Linux", 10);
        enqueue(&mut conn, "c", "x86_64-Linux", 10);

        let first = Build::claim_next("x86_64-Linux", &mut conn).unwrap().unwrap();
        Build::transition(first.id, BuildStatus::Succeeded, None, &mut conn).unwrap();
        let second = Build::claim_next("x86_64-Linux", &mut conn).unwrap().unwrap();
        Build::transition(second.id, BuildStatus::Failed, Some("boom"), &mut conn).unwrap();

        let stats = Build::stats(&mut conn).unwrap();
        assert_eq!(stats.total_builds, 3);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate_percent - 50.0).abs() < f64::EPSILON);
    }
}
