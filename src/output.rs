//! 面向用户的进度输出（每个文件一行）

use crate::error::AppError;
use serde_json::json;
use std::sync::Mutex;

pub trait OutputSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// 直接打印到标准输出
#[derive(Debug, Default)]
pub struct ConsoleOutput;

impl OutputSink for ConsoleOutput {
    fn write_line(&self, line: &str) {
        println!("{}", line);
    }
}

/// 收集所有行，结束时以 JSON 输出
#[derive(Debug, Default)]
pub struct JsonOutput {
    lines: Mutex<Vec<String>>,
}

impl JsonOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// `{"lines": [...]}`，失败时附带 `error.message` 和 `error.code`
    pub fn to_json(&self, error: Option<&AppError>) -> serde_json::Value {
        let mut value = json!({ "lines": self.lines() });
        if let Some(error) = error {
            value["error"] = json!({
                "message": error.to_string(),
                "code": error.code(),
            });
        }
        value
    }
}

impl OutputSink for JsonOutput {
    fn write_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }
}
