use crate::args::PostgresArgs;
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, RecyclingMethod};
use postgres::NoTls;
use std::env;

pub async fn create_pool(pg_args: PostgresArgs) -> Pool {
    let mut pg_pool_cfg = PgConfig::new();
    pg_pool_cfg.dbname = Some(pg_args.postgres_database);
    pg_pool_cfg.host = Some(pg_args.postgres_host);
    pg_pool_cfg.port = Some(pg_args.postgres_port);
    pg_pool_cfg.user = Some(pg_args.postgres_username);
    pg_pool_cfg.password = pg_args
        .postgres_password
        .or_else(|| env::var("POSTGRES_PASSWORD").ok());
    pg_pool_cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    // TLS is intentionally not wired up here: the engine talks to Postgres
    // over a private network segment in every deployment we target.
    pg_pool_cfg
        .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
        .expect("Failed to create Postgres pool")
}

pub fn strip_sql_comments(input: &str) -> String {
    let mut output = String::new();
    for line in input.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("--") || trimmed.is_empty() {
            continue;
        }
        if let Some(pos) = line.find("--") {
            output.push_str(&line[..pos]);
            output.push('\n');
        } else {
            output.push_str(line);
            output.push('\n');
        }
    }
    output
}
