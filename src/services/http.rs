//! 出站 HTTP 辅助
//!
//! ureq 是同步客户端，调用放在 `spawn_blocking` 中执行，
//! 外层再用 `tokio::time::timeout` 限制总耗时。

use std::time::Duration;

use anyhow::anyhow;
use ureq::Agent;

/// 创建带全局超时的 Agent（Agent 内部是 Arc，clone 开销很小）
pub fn build_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// 在阻塞线程池中执行 `f`，超过 `timeout` 视为失败
pub async fn run_blocking<T, F>(op: &'static str, timeout: Duration, f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(anyhow!("{} task failed: {}", op, e)),
        Err(_) => Err(anyhow!("{} timed out after {}s", op, timeout.as_secs())),
    }
}

/// 把 ureq 错误转成带状态码的描述
pub fn describe_error(op: &str, err: ureq::Error) -> String {
    match err {
        ureq::Error::StatusCode(code) => format!("{} failed. HTTP Code: {}", op, code),
        other => format!("{} failed: {}", op, other),
    }
}
