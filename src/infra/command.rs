//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 实时日志流式输出（写入 tracing）
//! - 超时控制
//! - 取消支持
//! - 仅对子进程可见的环境变量（用于传递凭据）
//! - stdin 输入与 stdout 直接写入文件

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed(std::io::Error),
    /// 命令超时
    Timeout,
    /// 命令被取消
    Cancelled,
    /// 等待命令完成失败
    WaitFailed(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::Timeout => write!(f, "Command timed out"),
            CommandError::Cancelled => write!(f, "Command was cancelled"),
            CommandError::WaitFailed(e) => write!(f, "Failed to wait for command: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e) | CommandError::WaitFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// 命令执行结果
pub struct CommandResult {
    /// 退出状态
    pub status: ExitStatus,
    /// 是否因超时而终止
    pub timed_out: bool,
}

/// 待执行的命令
///
/// `env` 中的变量只设置在子进程上，不会写入本进程环境，也不会出现在命令行里。
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str], timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            work_dir: None,
            env: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.work_dir = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    /// 可安全记录到日志的命令行（不含环境变量值）
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        if let Some(ref dir) = self.work_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl CommandRunner {
    /// 执行命令并流式输出日志
    ///
    /// # Arguments
    /// * `spec` - 命令
    /// * `cancel` - 取消令牌
    ///
    /// # Returns
    /// 命令执行结果或错误
    pub async fn run_with_streaming(
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        info!(command = %spec.display(), "Running command");

        let mut child = spec
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // 启动 stdout 读取任务
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(stream = "stdout", "{}", line);
                }
            }
        });

        // 启动 stderr 读取任务（compose 的进度信息通常输出到 stderr）
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(stream = "stderr", "{}", line);
                }
            }
        });

        // 等待命令完成，支持超时和取消
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Command cancelled, killing process");
                let _ = child.kill().await;
                Err(CommandError::Cancelled)
            }
            _ = tokio::time::sleep(spec.timeout) => {
                error!("Command timed out after {:?}", spec.timeout);
                let _ = child.kill().await;
                // 等待进程实际终止
                let status = child.wait().await.map_err(CommandError::WaitFailed)?;
                Ok(CommandResult { status, timed_out: true })
            }
            status = child.wait() => {
                let status = status.map_err(CommandError::WaitFailed)?;
                Ok(CommandResult { status, timed_out: false })
            }
        };

        // 等待日志读取完成
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        result
    }

    /// 执行命令并收集输出，可写入 stdin
    pub async fn run(spec: &CommandSpec) -> Result<Output, CommandError> {
        debug!(command = %spec.display(), "Running command");

        let mut child = spec
            .command()
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            let input = input.clone();
            tokio::spawn(async move {
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            });
        }

        match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(CommandError::WaitFailed),
            Err(_) => Err(CommandError::Timeout),
        }
    }

    /// 执行命令并把 stdout 直接写入文件（用于大体积的数据库导出）
    ///
    /// 返回进程退出状态与 stderr 内容
    pub async fn run_to_file(
        spec: &CommandSpec,
        out: std::fs::File,
    ) -> Result<(ExitStatus, String), CommandError> {
        debug!(command = %spec.display(), "Running command with stdout redirected to file");

        let child = spec
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok((
                output.status,
                String::from_utf8_lossy(&output.stderr).to_string(),
            )),
            Ok(Err(e)) => Err(CommandError::WaitFailed(e)),
            Err(_) => Err(CommandError::Timeout),
        }
    }

    /// 执行简单命令（无流式输出）
    pub async fn run_simple(
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output, CommandError> {
        Self::run(&CommandSpec::new(program, args, timeout)).await
    }

    /// 检查程序是否在 PATH 中
    pub async fn is_on_path(program: &str) -> bool {
        Self::run_simple("which", &[program], Duration::from_secs(5))
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}
