//! File and process tools confined to a project sandbox.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::guard::confine;

use super::{FileAccess, Tool, ToolParams};

fn required_str<'a>(params: &'a ToolParams, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation(format!("missing string parameter `{}`", key)))
}

fn resolve(root: &Path, raw: &str) -> Result<PathBuf> {
    confine(root, raw)
        .ok_or_else(|| Error::Validation(format!("path {:?} is outside the sandbox", raw)))
}

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn access(&self) -> FileAccess {
        FileAccess::Read
    }

    fn invoke(&self, params: &ToolParams) -> Result<Value> {
        let raw = required_str(params, "path")?;
        let content = fs::read_to_string(resolve(&self.root, raw)?)?;
        Ok(json!({ "path": raw, "bytes": content.len(), "content": content }))
    }
}

pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn access(&self) -> FileAccess {
        FileAccess::Write
    }

    fn invoke(&self, params: &ToolParams) -> Result<Value> {
        let raw = required_str(params, "path")?;
        let content = required_str(params, "content")?;
        let path = resolve(&self.root, raw)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(json!({ "path": raw, "bytes": content.len() }))
    }
}

pub struct ListDirTool {
    root: PathBuf,
}

impl ListDirTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn access(&self) -> FileAccess {
        FileAccess::Read
    }

    fn invoke(&self, params: &ToolParams) -> Result<Value> {
        let raw = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let dir = resolve(&self.root, raw)?;
        let mut entries: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.path().is_dir() {
                    format!("{}/", name)
                } else {
                    name
                }
            })
            .collect();
        entries.sort();
        Ok(json!({ "path": raw, "entries": entries }))
    }
}

/// Runs a program (looked up on `PATH`) inside the sandbox. A non-zero exit
/// is a successful call with `"success": false`.
pub struct RunCommandTool {
    root: PathBuf,
}

impl RunCommandTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn invoke(&self, params: &ToolParams) -> Result<Value> {
        let program = required_str(params, "program")?;
        let binary = which::which(program)
            .map_err(|_| Error::Validation(format!("program not found: {}", program)))?;
        let args: Vec<String> = params
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();

        fs::create_dir_all(&self.root)?;
        let output = Command::new(binary)
            .args(&args)
            .current_dir(&self.root)
            .output()?;
        Ok(json!({
            "success": output.status.success(),
            "status": output.status.code(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }
}
