use forgectl_common::errors::*;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

/// Prefix for driver output mirrored to the host console and the log sink.
const OUTPUT_PREFIX: &str = "  │ ";

/// How many trailing bytes of a build log make it into the error message.
const LOG_TAIL_BYTES: usize = 500;

/// Spawn the build driver for one recipe and tee its output. Returns whether
/// the driver exited successfully; everything it printed ends up in the log
/// sink and on the host's stdout.
pub async fn run_driver(
    bin: &Path,
    recipe_path: &Path,
    workdir: &Path,
    log_path: &Path,
    envs: &[(&str, String)],
) -> Result<bool> {
    info!("Running {:?} {:?}", bin, recipe_path);

    let mut child = Command::new(bin)
        .arg(recipe_path)
        .current_dir(workdir)
        .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn build driver {:?}", bin))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| format_err!("Failed to attach to driver stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| format_err!("Failed to attach to driver stderr"))?;

    let sink = Arc::new(Mutex::new(
        File::create(log_path)
            .await
            .with_context(|| format!("Failed to create log file {:?}", log_path))?,
    ));

    // one copier per pipe, both feed the same sink until their pipe closes
    let copy_stdout = tokio::spawn(copy_lines(stdout, sink.clone()));
    let copy_stderr = tokio::spawn(copy_lines(stderr, sink.clone()));

    let status = child.wait().await.context("Failed to wait for build driver")?;
    copy_stdout.await??;
    copy_stderr.await??;
    sink.lock().await.flush().await?;

    info!("{:?} exited with {}", bin, status);
    Ok(status.success())
}

async fn copy_lines<R>(stream: R, sink: Arc<Mutex<File>>) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        let line = format!("{}{}\n", OUTPUT_PREFIX, line);
        print!("{}", line);
        let mut sink = sink.lock().await;
        sink.write_all(line.as_bytes()).await?;
    }
    Ok(())
}

/// Last bytes of the build log, for the `error_message` of a failed build.
pub fn read_log_tail(log_path: &Path) -> Option<String> {
    let content = std::fs::read(log_path).ok()?;
    if content.is_empty() {
        return None;
    }
    let start = content.len().saturating_sub(LOG_TAIL_BYTES);
    Some(String::from_utf8_lossy(&content[start..]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn log_tail_returns_last_bytes() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("build.log");

        assert!(read_log_tail(&log).is_none());

        fs::write(&log, "short log").unwrap();
        assert_eq!(read_log_tail(&log).unwrap(), "short log");

        let long = "x".repeat(600) + "tail marker";
        fs::write(&log, &long).unwrap();
        let tail = read_log_tail(&log).unwrap();
        assert_eq!(tail.len(), 500);
        assert!(tail.ends_with("tail marker"));
    }
}
