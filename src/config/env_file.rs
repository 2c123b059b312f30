//! `.env` 配置源
//!
//! 扁平的键值文件。运行开始时读取一次；只有环境校验器的自动生成步骤会追加新键，
//! 并且从不改写已有的行。

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

/// 已解析的 `.env` 文件
#[derive(Clone, Debug)]
pub struct EnvFile {
    path: PathBuf,
    /// 键的出现顺序
    order: Vec<String>,
    values: HashMap<String, String>,
}

impl EnvFile {
    /// 读取并解析文件
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(path, &content))
    }

    /// 解析文件内容（同名键以首次出现为准）
    pub fn parse(path: &Path, content: &str) -> Self {
        let mut order = Vec::new();
        let mut values = HashMap::new();

        for line in content.lines() {
            let Some((key, value)) = parse_line(line) else {
                continue;
            };
            if values.contains_key(&key) {
                continue;
            }
            order.push(key.clone());
            values.insert(key, value);
        }

        Self {
            path: path.to_path_buf(),
            order,
            values,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// 缺失或为空
    pub fn is_blank(&self, key: &str) -> bool {
        self.get(key).map(|v| v.trim().is_empty()).unwrap_or(true)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|k| k.as_str())
    }

    /// 在文件末尾追加 `KEY=value`
    ///
    /// 键已存在时不做任何修改并返回 `false`。
    pub fn append(&mut self, key: &str, value: &str) -> std::io::Result<bool> {
        if self.contains(key) {
            return Ok(false);
        }

        let needs_newline = std::fs::read(&self.path)
            .map(|bytes| !bytes.is_empty() && !bytes.ends_with(b"\n"))
            .unwrap_or(false);

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        if needs_newline {
            writeln!(file)?;
        }
        writeln!(file, "{}={}", key, value)?;
        file.flush()?;

        self.order.push(key.to_string());
        self.values.insert(key.to_string(), value.to_string());
        info!(key = %key, path = %self.path.display(), "Appended generated key to env file");
        Ok(true)
    }
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), unquote(value.trim()).to_string()))
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_content() {
        let env = EnvFile::parse(
            Path::new(".env"),
            "# homelab\n\
             POSTGRES_PASSWORD=s3cret\n\
             export WEB_USERNAME=\"admin\"\n\
             WEB_PASSWORD='p=ss'\n\
             SESSION_SECRET=\n\
             POSTGRES_PASSWORD=duplicate\n\
             not a pair\n",
        );
        assert_eq!(env.get("POSTGRES_PASSWORD"), Some("s3cret"));
        assert_eq!(env.get("WEB_USERNAME"), Some("admin"));
        assert_eq!(env.get("WEB_PASSWORD"), Some("p=ss"));
        assert!(env.contains("SESSION_SECRET"));
        assert!(env.is_blank("SESSION_SECRET"));
        assert!(env.is_blank("MISSING"));
        assert_eq!(env.keys().count(), 4);
    }

    #[test]
    fn test_append_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "SERVICE_AUTH_TOKEN=existing").unwrap();

        let mut env = EnvFile::load(&path).unwrap();
        assert!(!env.append("SERVICE_AUTH_TOKEN", "new").unwrap());
        assert!(env.append("OTHER_TOKEN", "abc").unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "SERVICE_AUTH_TOKEN=existing\nOTHER_TOKEN=abc\n");

        let reloaded = EnvFile::load(&path).unwrap();
        assert_eq!(reloaded.get("SERVICE_AUTH_TOKEN"), Some("existing"));
        assert_eq!(reloaded.get("OTHER_TOKEN"), Some("abc"));
    }
}
