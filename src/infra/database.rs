//! 数据库管理
//!
//! 通过容器内的 `psql` / `pg_dumpall` 操作 PostgreSQL。
//! 所有 DDL 都是条件式的（"不存在则创建"），同一主机上并发的两次运行也不会产生重复对象。
//! 超级用户密码只以子进程环境变量传递。

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::runtime::{ContainerRuntime, ExecRequest, RuntimeError};

/// 数据库操作错误
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("query failed: {0}")]
    Query(String),

    #[error("unexpected query output: {0}")]
    Parse(String),
}

/// 幂等操作的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

impl Provisioned {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provisioned::Created => "created",
            Provisioned::AlreadyExists => "already exists",
        }
    }
}

/// 数据库管理接口
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// 创建登录角色；已存在则更新密码
    async fn ensure_role(&self, user: &str, password: &str) -> Result<Provisioned, DbError>;
    /// 创建数据库（不存在时）
    async fn ensure_database(&self, name: &str, owner: &str) -> Result<Provisioned, DbError>;
    /// 用户表数量
    async fn count_tables(&self, database: &str) -> Result<u64, DbError>;
    /// 全量逻辑导出，写入 `out`
    async fn dump_all(&self, out: std::fs::File) -> Result<(), DbError>;
    /// 恢复该备份的命令
    fn restore_command(&self, artifact: &Path) -> String;
}

/// 容器内的 PostgreSQL
pub struct PostgresAdmin {
    runtime: Arc<dyn ContainerRuntime>,
    service: String,
    superuser: String,
    password: String,
}

impl PostgresAdmin {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        service: &str,
        superuser: &str,
        password: &str,
    ) -> Self {
        Self {
            runtime,
            service: service.to_string(),
            superuser: superuser.to_string(),
            password: password.to_string(),
        }
    }

    fn psql(&self, database: &str) -> ExecRequest {
        ExecRequest::new([
            "psql",
            "-v",
            "ON_ERROR_STOP=1",
            "-U",
            self.superuser.as_str(),
            "-d",
            database,
        ])
        .secret("PGPASSWORD", &self.password)
    }

    async fn run_sql(&self, database: &str, sql: String) -> Result<super::runtime::ExecOutput, DbError> {
        let output = self.runtime.exec(&self.service, self.psql(database).stdin(sql)).await?;
        Ok(output)
    }
}

#[async_trait]
impl DatabaseAdmin for PostgresAdmin {
    async fn ensure_role(&self, user: &str, password: &str) -> Result<Provisioned, DbError> {
        let output = self.run_sql("postgres", role_sql(user, password)).await?;
        if !output.success() {
            return Err(DbError::Query(output.stderr.trim().to_string()));
        }
        if output.stderr.contains(ROLE_EXISTS_NOTICE) {
            Ok(Provisioned::AlreadyExists)
        } else {
            Ok(Provisioned::Created)
        }
    }

    async fn ensure_database(&self, name: &str, owner: &str) -> Result<Provisioned, DbError> {
        let output = self.run_sql("postgres", database_sql(name, owner)).await?;
        if !output.success() {
            // 并发运行抢先创建了同名数据库
            if output.stderr.contains("already exists") {
                return Ok(Provisioned::AlreadyExists);
            }
            return Err(DbError::Query(output.stderr.trim().to_string()));
        }
        if output.stdout.contains("CREATE DATABASE") {
            Ok(Provisioned::Created)
        } else {
            Ok(Provisioned::AlreadyExists)
        }
    }

    async fn count_tables(&self, database: &str) -> Result<u64, DbError> {
        let request = ExecRequest::new([
            "psql",
            "-tA",
            "-U",
            self.superuser.as_str(),
            "-d",
            database,
            "-c",
            COUNT_TABLES_SQL,
        ])
        .secret("PGPASSWORD", &self.password);
        let output = self.runtime.exec(&self.service, request).await?;
        if !output.success() {
            return Err(DbError::Query(output.stderr.trim().to_string()));
        }
        let trimmed = output.stdout.trim();
        debug!(database = %database, tables = %trimmed, "Counted user tables");
        trimmed
            .parse()
            .map_err(|_| DbError::Parse(trimmed.to_string()))
    }

    async fn dump_all(&self, out: std::fs::File) -> Result<(), DbError> {
        let request = ExecRequest::new(["pg_dumpall", "-U", self.superuser.as_str()])
            .secret("PGPASSWORD", &self.password);
        self.runtime.exec_to_file(&self.service, request, out).await?;
        Ok(())
    }

    fn restore_command(&self, artifact: &Path) -> String {
        format!(
            "cat {} | {} exec -T {} psql -U {} -d postgres",
            artifact.display(),
            self.runtime.compose_display(),
            self.service,
            self.superuser
        )
    }
}

const ROLE_EXISTS_NOTICE: &str = "bootstrap:role-exists";

const COUNT_TABLES_SQL: &str = "SELECT count(*) FROM information_schema.tables \
     WHERE table_schema NOT IN ('pg_catalog', 'information_schema') AND table_type = 'BASE TABLE'";

/// 创建角色，`duplicate_object` 时改为更新密码
fn role_sql(user: &str, password: &str) -> String {
    let ident = quote_ident(user);
    let literal = quote_literal(password);
    let tag = dollar_tag(&[&ident, &literal]);
    format!(
        "DO ${tag}$\n\
         BEGIN\n\
         \x20 CREATE ROLE {ident} LOGIN PASSWORD {literal};\n\
         EXCEPTION WHEN duplicate_object THEN\n\
         \x20 ALTER ROLE {ident} WITH LOGIN PASSWORD {literal};\n\
         \x20 RAISE NOTICE '{ROLE_EXISTS_NOTICE}';\n\
         END\n\
         ${tag}$;\n"
    )
}

/// 选一个不出现在正文里的 dollar-quote 标签
fn dollar_tag(parts: &[&str]) -> String {
    let mut tag = "bootstrap".to_string();
    let mut n = 0u32;
    while parts.iter().any(|p| p.contains(&format!("${}$", tag))) {
        n += 1;
        tag = format!("bootstrap{}", n);
    }
    tag
}

/// 仅当数据库不存在时才生成并执行 CREATE DATABASE
fn database_sql(name: &str, owner: &str) -> String {
    let name_literal = quote_literal(name);
    let owner_literal = quote_literal(owner);
    format!(
        "SELECT format('CREATE DATABASE %I OWNER %I', {name_literal}, {owner_literal})\n\
         WHERE NOT EXISTS (SELECT FROM pg_database WHERE datname = {name_literal})\\gexec\n\
         GRANT ALL PRIVILEGES ON DATABASE {} TO {};\n",
        quote_ident(name),
        quote_ident(owner)
    )
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::ExecOutput;
    use crate::services::testing::FakeRuntime;

    fn admin(runtime: &FakeRuntime) -> PostgresAdmin {
        PostgresAdmin::new(Arc::new(runtime.clone()), "postgres", "postgres", "pg-secret")
    }

    fn reply(code: i32, stdout: &str, stderr: &str) -> ExecOutput {
        ExecOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[tokio::test]
    async fn test_database_created_concurrently_is_already_exists() {
        let runtime = FakeRuntime::with_running(&["postgres"]);
        runtime.state().exec_reply = Some(reply(
            1,
            "",
            "ERROR:  database \"homelab\" already exists",
        ));

        let result = admin(&runtime).ensure_database("homelab", "homelab").await.unwrap();
        assert_eq!(result, Provisioned::AlreadyExists);
    }

    #[tokio::test]
    async fn test_database_provisioning() {
        let runtime = FakeRuntime::with_running(&["postgres"]);
        runtime.state().exec_reply = Some(reply(0, "CREATE DATABASE\nGRANT\n", ""));
        let db = admin(&runtime);
        assert_eq!(db.ensure_database("homelab", "homelab").await.unwrap(), Provisioned::Created);

        runtime.state().exec_reply = Some(reply(0, "GRANT\n", ""));
        assert_eq!(db.ensure_database("homelab", "homelab").await.unwrap(), Provisioned::AlreadyExists);

        runtime.state().exec_reply = Some(reply(2, "", "psql: error: connection refused"));
        let err = db.ensure_database("homelab", "homelab").await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_role_exists_notice() {
        let runtime = FakeRuntime::with_running(&["postgres"]);
        runtime.state().exec_reply = Some(reply(
            0,
            "DO\n",
            &format!("NOTICE:  {}", ROLE_EXISTS_NOTICE),
        ));
        let result = admin(&runtime).ensure_role("homelab", "secret").await.unwrap();
        assert_eq!(result, Provisioned::AlreadyExists);
    }

    #[test]
    fn test_role_sql_tag_avoids_password_content() {
        let sql = role_sql("jarvis", "x$bootstrap$y");
        assert!(sql.starts_with("DO $bootstrap1$\n"));
        assert!(sql.trim_end().ends_with("$bootstrap1$;"));
        assert_eq!(sql.matches("$bootstrap1$").count(), 2);
        assert!(sql.contains("'x$bootstrap$y'"));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("jarvis"), "\"jarvis\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("pa'ss"), "'pa''ss'");
    }

    #[test]
    fn test_role_sql_is_race_safe() {
        let sql = role_sql("jarvis", "s3'cret");
        assert!(sql.contains("CREATE ROLE \"jarvis\" LOGIN PASSWORD 's3''cret';"));
        assert!(sql.contains("EXCEPTION WHEN duplicate_object THEN"));
        assert!(sql.contains("ALTER ROLE \"jarvis\" WITH LOGIN PASSWORD 's3''cret';"));
        assert!(sql.contains(ROLE_EXISTS_NOTICE));
    }

    #[test]
    fn test_database_sql_is_conditional() {
        let sql = database_sql("homelab_jarvis", "jarvis");
        assert!(sql.contains("WHERE NOT EXISTS (SELECT FROM pg_database WHERE datname = 'homelab_jarvis')"));
        assert!(sql.contains("\\gexec"));
        assert!(sql.contains("GRANT ALL PRIVILEGES ON DATABASE \"homelab_jarvis\" TO \"jarvis\";"));
    }
}
