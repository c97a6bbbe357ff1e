use crate::db::Pool;
use crate::models::Build;
use crate::proc;
use crate::publish::Publisher;
use forgectl_common::config::{ERROR_DELAY, IDLE_DELAY};
use forgectl_common::errors::*;
use forgectl_common::utils;
use forgectl_common::BuildStatus;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;

pub struct Config {
    pub driver_path: PathBuf,
    pub repo_path: PathBuf,
    pub work_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Config {
    pub fn new<P: Into<PathBuf>>(repo_path: P) -> Config {
        Config {
            driver_path: PathBuf::from("sbuild"),
            repo_path: repo_path.into(),
            work_dir: PathBuf::from("/tmp/forgectl-work"),
            log_dir: PathBuf::from("./logs"),
        }
    }
}

pub struct Executor {
    pool: Pool,
    driver: PathBuf,
    repo_path: PathBuf,
    work_dir: PathBuf,
    log_dir: PathBuf,
    publisher: Publisher,
}

pub fn locate_driver(driver: &Path) -> Result<PathBuf> {
    utils::find_tool(driver).context(
        "Build driver not found, install sbuild from https://github.com/pkgforge/sbuilder",
    )
}

pub async fn driver_version(driver: &Path) -> Result<String> {
    let output = Command::new(driver)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("Failed to run {:?} --version", driver))?;
    if !output.status.success() {
        bail!("{:?} --version exited with {}", driver, output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl Executor {
    pub fn new(pool: Pool, config: Config) -> Result<Executor> {
        let repo_path = config
            .repo_path
            .canonicalize()
            .with_context(|| format!("Recipe repository not found: {:?}", config.repo_path))?;

        fs::create_dir_all(&config.work_dir).context("Failed to create work dir")?;
        fs::create_dir_all(&config.log_dir).context("Failed to create log dir")?;

        let driver = locate_driver(&config.driver_path)?;
        let publisher = Publisher::new(repo_path.clone());

        Ok(Executor {
            pool,
            driver,
            repo_path,
            work_dir: config.work_dir,
            log_dir: config.log_dir,
            publisher,
        })
    }

    /// Claim the next queued build for `arch` and run it to a terminal state.
    pub async fn execute_next(&self, arch: &str) -> Result<Option<Build>> {
        let mut connection = self.pool.get()?;
        let Some(build) = Build::claim_next(arch, &mut connection)? else {
            return Ok(None);
        };
        drop(connection);

        self.execute_claimed(build).await.map(Some)
    }

    /// Run one specific build by id. The row must still be `queued`.
    pub async fn execute_build(&self, my_id: i64) -> Result<Build> {
        let mut connection = self.pool.get()?;
        let build = Build::transition(my_id, BuildStatus::Building, None, &mut connection)?;
        drop(connection);

        self.execute_claimed(build).await
    }

    /// Drive a claimed build to `succeeded` or `failed`. Build errors are
    /// swallowed into row state, only store errors surface to the caller.
    async fn execute_claimed(&self, build: Build) -> Result<Build> {
        info!("Building: {} [{}] (id: {})", build.pkg_name, build.arch, build.id);

        let log_path = self
            .log_dir
            .join(format!("build-{}-{}.log", build.id, build.pkg_name));
        let scratch = self.work_dir.join(build.id.to_string());

        let result = self.run_build(&build, &scratch, &log_path).await;

        let mut connection = self.pool.get()?;
        let build = match result {
            Ok(()) => {
                let build =
                    Build::transition(build.id, BuildStatus::Succeeded, None, &mut connection)?;
                info!(
                    "  ✓ Succeeded in {}",
                    utils::secs_to_human(build.duration_seconds.unwrap_or(0))
                );
                build
            }
            Err(err) => {
                let message = format!("{:#}", err);
                let build = Build::transition(
                    build.id,
                    BuildStatus::Failed,
                    Some(&message),
                    &mut connection,
                )?;
                info!(
                    "  ✗ Failed in {}",
                    utils::secs_to_human(build.duration_seconds.unwrap_or(0))
                );
                build
            }
        };

        Ok(build)
    }

    async fn run_build(&self, build: &Build, scratch: &Path, log_path: &Path) -> Result<()> {
        let recipe_path = self.repo_path.join(&build.recipe_path);
        if !recipe_path.is_file() {
            bail!("Recipe file not found: {:?}", recipe_path);
        }

        fs::create_dir_all(scratch).context("Failed to create scratch dir")?;

        let envs = [
            ("TARGET_ARCH", build.arch.clone()),
            ("PKG_NAME", build.pkg_name.clone()),
            ("BUILD_ID", build.id.to_string()),
        ];

        let success = proc::run_driver(&self.driver, &recipe_path, scratch, log_path, &envs).await?;
        if !success {
            let tail = proc::read_log_tail(log_path)
                .unwrap_or_else(|| "Build driver exited with an error".to_string());
            bail!("{}", tail);
        }

        self.publisher
            .upload_package(build, scratch)
            .await
            .context("Failed to publish build artifacts")?;

        Ok(())
    }

    /// One worker loop: claim, build, repeat. Sleeps when the queue is empty,
    /// backs off harder on store errors, and checks the stop flag between
    /// iterations. An in-flight build is never interrupted.
    pub async fn run_worker(&self, arch: &str, stop: Arc<AtomicBool>) {
        info!("Worker started for {}", arch);

        while !stop.load(Ordering::Relaxed) {
            match self.execute_next(arch).await {
                Ok(Some(build)) => {
                    debug!("Finished build {} ({})", build.id, build.status);
                }
                Ok(None) => {
                    debug!("No pending builds for {}, sleeping for {}s", arch, IDLE_DELAY);
                    time::sleep(Duration::from_secs(IDLE_DELAY)).await;
                }
                Err(err) => {
                    error!("Unexpected error in worker loop, backing off: {:#}", err);
                    time::sleep(Duration::from_secs(ERROR_DELAY)).await;
                }
            }
        }

        info!("Worker stopped for {}", arch);
    }

    /// Run `count` workers for one architecture. With a duration bound the
    /// pool stops claiming when it elapses, otherwise it drains the queue and
    /// stops once nothing is queued or building.
    pub async fn run_workers(
        self: Arc<Self>,
        arch: &str,
        count: usize,
        max_duration: Option<Duration>,
    ) -> Result<()> {
        let stop = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::new();
        for _ in 0..count {
            let executor = self.clone();
            let arch = arch.to_string();
            let stop = stop.clone();
            workers.push(tokio::spawn(async move {
                executor.run_worker(&arch, stop).await;
            }));
        }

        if let Some(limit) = max_duration {
            info!("Will run for at most {}", utils::secs_to_human(limit.as_secs() as i64));
            time::sleep(limit).await;
        } else {
            loop {
                time::sleep(Duration::from_secs(IDLE_DELAY)).await;
                let mut connection = self.pool.get()?;
                let stats = Build::stats(&mut connection)?;
                if stats.queued == 0 && stats.building == 0 {
                    info!("No more builds in queue");
                    break;
                }
            }
        }

        stop.store(true, Ordering::Relaxed);
        for worker in workers {
            worker.await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::NewBuild;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    struct TestEnv {
        _tmp: TempDir,
        pool: Pool,
        config: Config,
        db_path: PathBuf,
    }

    fn fake_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn test_env(script: &str) -> TestEnv {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();

        let repo = root.join("repo");
        fs::create_dir_all(repo.join("binaries/tool")).unwrap();
        fs::write(repo.join("binaries/tool/static.yaml"), "pkg: tool\nversion: \"1.0\"\n")
            .unwrap();

        let db_path = root.join("queue.db");
        let pool = db::setup_pool(db_path.to_str().unwrap()).unwrap();

        let config = Config {
            driver_path: fake_tool(root, "fake-sbuild", script),
            repo_path: repo,
            work_dir: root.join("work"),
            log_dir: root.join("logs"),
        };

        TestEnv { _tmp: tmp, pool, config, db_path }
    }

    fn enqueue_tool(env: &TestEnv) -> i64 {
        let mut conn = env.pool.get().unwrap();
        NewBuild::new("tool", "tool", "binaries/tool/static.yaml", "x86_64-Linux", 10, false)
            .insert(&mut conn)
            .unwrap()
    }

    #[tokio::test]
    async fn failing_driver_marks_build_failed_with_log_tail() {
        let env = test_env("echo compiling...; echo error: undefined symbol; exit 1");
        let id = enqueue_tool(&env);

        let executor = Executor::new(env.pool.clone(), env.config).unwrap();
        let build = executor.execute_next("x86_64-Linux").await.unwrap().unwrap();

        assert_eq!(build.id, id);
        assert_eq!(build.status().unwrap(), BuildStatus::Failed);
        let message = build.error_message.unwrap();
        assert!(message.contains("undefined symbol"), "got: {}", message);
        assert!(build.completed_at.is_some());
    }

    #[tokio::test]
    async fn missing_recipe_fails_fast() {
        let env = test_env("exit 0");
        let mut conn = env.pool.get().unwrap();
        let id = NewBuild::new("ghost", "ghost", "binaries/ghost/none.yaml", "x86_64-Linux", 10, false)
            .insert(&mut conn)
            .unwrap();
        drop(conn);

        let executor = Executor::new(env.pool.clone(), env.config).unwrap();
        let build = executor.execute_next("x86_64-Linux").await.unwrap().unwrap();

        assert_eq!(build.id, id);
        assert_eq!(build.status().unwrap(), BuildStatus::Failed);
        assert!(build.error_message.unwrap().contains("Recipe file not found"));
    }

    #[tokio::test]
    async fn driver_runs_in_scratch_dir_with_build_env() {
        let env = test_env("echo \"$TARGET_ARCH $PKG_NAME $BUILD_ID\" > env.txt; exit 1");
        let id = enqueue_tool(&env);

        let executor = Executor::new(env.pool.clone(), env.config).unwrap();
        executor.execute_next("x86_64-Linux").await.unwrap().unwrap();

        let env_file = env.db_path.parent().unwrap().join("work").join(id.to_string()).join("env.txt");
        let content = fs::read_to_string(env_file).unwrap();
        assert_eq!(content.trim(), format!("x86_64-Linux tool {}", id));
    }

    #[tokio::test]
    async fn log_file_captures_driver_output() {
        let env = test_env("echo hello from driver; exit 1");
        let id = enqueue_tool(&env);

        let executor = Executor::new(env.pool.clone(), env.config).unwrap();
        executor.execute_next("x86_64-Linux").await.unwrap().unwrap();

        let log = env
            .db_path
            .parent()
            .unwrap()
            .join("logs")
            .join(format!("build-{}-tool.log", id));
        let content = fs::read_to_string(log).unwrap();
        assert!(content.contains("hello from driver"));
    }

    #[tokio::test]
    async fn successful_build_publishes_and_succeeds() {
        let env = test_env("echo built > tool; exit 0");
        let id = enqueue_tool(&env);
        let root = env.db_path.parent().unwrap().to_path_buf();

        let mut executor = Executor::new(env.pool.clone(), env.config).unwrap();
        executor.publisher.oras_path = fake_tool(&root, "fake-oras", "exit 0");

        let build = executor.execute_next("x86_64-Linux").await.unwrap().unwrap();
        assert_eq!(build.status().unwrap(), BuildStatus::Succeeded);
        assert!(build.error_message.is_none());

        // the driver's artifact and the generated per-target metadata
        let scratch = root.join("work").join(id.to_string());
        assert!(scratch.join("tool").is_file());
        assert!(scratch.join("tool.json").is_file());
    }

    #[tokio::test]
    async fn failed_upload_marks_build_failed() {
        let env = test_env("echo built > tool; exit 0");
        enqueue_tool(&env);
        let root = env.db_path.parent().unwrap().to_path_buf();

        let mut executor = Executor::new(env.pool.clone(), env.config).unwrap();
        executor.publisher.oras_path = fake_tool(&root, "fake-oras", "exit 3");

        let build = executor.execute_next("x86_64-Linux").await.unwrap().unwrap();
        assert_eq!(build.status().unwrap(), BuildStatus::Failed);
        assert!(build
            .error_message
            .unwrap()
            .contains("Failed to publish build artifacts"));
    }

    #[tokio::test]
    async fn empty_queue_claims_nothing() {
        let env = test_env("exit 0");
        let executor = Executor::new(env.pool.clone(), env.config).unwrap();
        assert!(executor.execute_next("x86_64-Linux").await.unwrap().is_none());
    }

    #[test]
    fn locate_driver_rejects_missing_tools() {
        assert!(locate_driver(Path::new("definitely-not-a-real-tool-xyz")).is_err());
        assert!(locate_driver(Path::new("/no/such/dir/tool")).is_err());
        assert!(locate_driver(Path::new("sh")).is_ok());
    }
}
