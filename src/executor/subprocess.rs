use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::engine::{BacktestEngine, ExecutionError, TimeRange};
use super::outcome::{BacktestMetrics, EngineReport};
use crate::domain_types::Configuration;
use crate::signature;

/// 以子程序方式呼叫外部回測引擎
///
/// 每次執行將配置寫入 `artifacts/<sig>_config.json`，並要求引擎把
/// 指標寫到 `artifacts/<sig>.json`。工件路徑由簽章決定，併發下
/// 不同試驗不會互相覆寫。
pub struct SubprocessEngine {
    command: PathBuf,
    args: Vec<String>,
    artifacts_dir: PathBuf,
    timeout: Duration,
}

impl SubprocessEngine {
    pub fn new(
        command: impl Into<PathBuf>,
        args: Vec<String>,
        artifacts_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, ExecutionError> {
        let artifacts_dir = artifacts_dir.into();
        std::fs::create_dir_all(&artifacts_dir)?;
        Ok(Self {
            command: command.into(),
            args,
            artifacts_dir,
            timeout,
        })
    }

    async fn write_config_file(
        &self,
        path: &Path,
        config: &Configuration,
        range: &TimeRange,
    ) -> Result<(), ExecutionError> {
        let payload = serde_json::json!({
            "parameters": config.to_json(),
            "start": range.start.to_rfc3339(),
            "end": range.end.to_rfc3339(),
        });
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(payload.to_string().as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl BacktestEngine for SubprocessEngine {
    async fn run_backtest(
        &self,
        config: &Configuration,
        range: &TimeRange,
    ) -> Result<EngineReport, ExecutionError> {
        let sig = signature::canonicalize(config);
        let config_path = self.artifacts_dir.join(format!("{sig}_config.json"));
        let artifact_path = self.artifacts_dir.join(format!("{sig}.json"));

        self.write_config_file(&config_path, config, range).await?;

        debug!(signature = %sig, command = %self.command.display(), "啟動回測子程序");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg("--config")
            .arg(&config_path)
            .arg("--output")
            .arg(&artifact_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecutionError::Spawn)?;

        let stderr = child.stderr.take();

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                // 逾時：強制終止子程序，部分結果一律丟棄
                warn!(signature = %sig, timeout_secs = self.timeout.as_secs(), "回測逾時，終止子程序");
                child.kill().await.ok();
                return Err(ExecutionError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        if !status.success() {
            let mut stderr_text = String::new();
            if let Some(mut pipe) = stderr {
                use tokio::io::AsyncReadExt;
                pipe.read_to_string(&mut stderr_text).await.ok();
            }
            return Err(ExecutionError::NonZeroExit {
                code: status.code(),
                stderr: stderr_text.chars().take(2048).collect(),
            });
        }

        if !artifact_path.exists() {
            return Err(ExecutionError::ArtifactMissing {
                path: artifact_path.display().to_string(),
            });
        }

        let raw = tokio::fs::read_to_string(&artifact_path).await?;
        let metrics: BacktestMetrics =
            serde_json::from_str(&raw).map_err(ExecutionError::ArtifactParse)?;

        Ok(EngineReport {
            metrics,
            artifact_path,
        })
    }
}
