// ==========================================
// 圣徒档案导入系统 - 命令行入口
// ==========================================
// 用法: saints-import <command> [args...]
// 输出: JSON（stdout），日志写 stderr
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use saints_import::app::AppState;
use saints_import::config::PipelineConfig;
use saints_import::domain::types::{ConflictPolicy, JobType, PhaseKind};
use saints_import::engine::DedupTarget;
use saints_import::logging;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tokio::sync::watch;

const USAGE: &str = "\
用法: saints-import <command> [args...]

工作流:
  load <source-dir> <master-sheet-id> [--policy <overwrite|skip-if-exists|merge-null-coalesce>]
  run <workflow-id>
  approve <workflow-id> <phase>
  reject <workflow-id> <phase>
  retry <workflow-id> <phase>
  cancel <workflow-id>
  status <workflow-id>

重复清理:
  dedup [--dry-run] [--target <saint_year|milestone_by_count|milestone_by_date|event>] [--queue]

回滚:
  rollback-info <workflow-id>
  rollback <workflow-id> [--queue]

任务队列:
  worker [--once]
  jobs
  job <job-id>
  job-cancel <job-id>
  job-retry <job-id>

配置:
  config-set <key> <value>
  config-show";

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_phase(raw: &str) -> Result<PhaseKind> {
    PhaseKind::parse(raw).ok_or_else(|| anyhow!("未知阶段: {}", raw))
}

/// 位置参数与 --flag / --key value 选项
struct Args {
    positional: Vec<String>,
    flags: Vec<(String, Option<String>)>,
}

impl Args {
    fn parse(raw: impl Iterator<Item = String>) -> Self {
        let mut positional = Vec::new();
        let mut flags = Vec::new();
        let mut iter = raw.peekable();
        while let Some(arg) = iter.next() {
            if let Some(name) = arg.strip_prefix("--") {
                let value = match name {
                    "policy" | "target" => iter.next(),
                    _ => None,
                };
                flags.push((name.to_string(), value));
            } else {
                positional.push(arg);
            }
        }
        Self { positional, flags }
    }

    fn arg(&self, idx: usize, name: &str) -> Result<&str> {
        self.positional
            .get(idx)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("缺少参数 <{}>\n\n{}", name, USAGE))
    }

    fn has(&self, flag: &str) -> bool {
        self.flags.iter().any(|(name, _)| name == flag)
    }

    fn value(&self, flag: &str) -> Option<&str> {
        self.flags
            .iter()
            .find(|(name, _)| name == flag)
            .and_then(|(_, value)| value.as_deref())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut raw = std::env::args().skip(1);
    let command = match raw.next() {
        Some(cmd) => cmd,
        None => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };
    let args = Args::parse(raw);

    if command == "worker" {
        logging::init_json();
    } else {
        logging::init();
    }

    let state = AppState::new(PipelineConfig::default().with_env_overrides())
        .await
        .map_err(|e| anyhow!(e))?;
    tracing::info!("{} v{} 数据库: {}", saints_import::APP_NAME, saints_import::VERSION, state.config.db_path);

    match command.as_str() {
        "load" => {
            let root = PathBuf::from(args.arg(0, "source-dir")?);
            let master = args.arg(1, "master-sheet-id")?;
            let policy = match args.value("policy") {
                Some(raw) => ConflictPolicy::parse(raw).ok_or_else(|| anyhow!("未知冲突策略: {}", raw))?,
                None => state.config.conflict_mode,
            };

            let snapshot = state
                .load_snapshot(&root, master)
                .await
                .with_context(|| format!("读取数据源失败: {}", root.display()))?;
            let created_by = std::env::var("USER").unwrap_or_else(|_| "cli".to_string());
            let workflow_id = state.orchestrator.start(snapshot, policy, &created_by)?;
            print_json(&json!({ "workflow_id": workflow_id, "policy": policy }))
        }
        "run" => {
            let result = state.orchestrator.execute_current_phase(args.arg(0, "workflow-id")?)?;
            print_json(&result)
        }
        "approve" => {
            let outcome = state
                .orchestrator
                .approve(args.arg(0, "workflow-id")?, parse_phase(args.arg(1, "phase")?)?)?;
            print_json(&outcome)
        }
        "reject" => {
            let wf = state
                .orchestrator
                .reject(args.arg(0, "workflow-id")?, parse_phase(args.arg(1, "phase")?)?)?;
            print_json(&json!({ "workflow_id": wf.workflow_id, "state": wf.state }))
        }
        "retry" => {
            let result = state
                .orchestrator
                .retry(args.arg(0, "workflow-id")?, parse_phase(args.arg(1, "phase")?)?)?;
            print_json(&result)
        }
        "cancel" => {
            let wf = state.orchestrator.cancel(args.arg(0, "workflow-id")?)?;
            print_json(&json!({ "workflow_id": wf.workflow_id, "state": wf.state }))
        }
        "status" => print_json(&state.orchestrator.status(args.arg(0, "workflow-id")?)?),
        "dedup" => {
            let dry_run = args.has("dry-run") || state.config.dry_run;
            let target = args
                .value("target")
                .map(|raw| DedupTarget::parse(raw).ok_or_else(|| anyhow!("未知清理目标: {}", raw)))
                .transpose()?;

            if args.has("queue") {
                let payload = json!({ "dry_run": dry_run, "target": target.map(|t| t.as_str()) });
                let job_id = state.job_queue.enqueue(JobType::Reconcile, payload)?;
                return print_json(&json!({ "job_id": job_id }));
            }

            let reports = match target {
                Some(target) => vec![state.dedup.reconcile(target, dry_run)?],
                None => state.dedup.reconcile_all(dry_run)?,
            };
            print_json(&reports)
        }
        "rollback-info" => print_json(&state.rollback.compute_rollback_info(args.arg(0, "workflow-id")?)?),
        "rollback" => {
            let workflow_id = args.arg(0, "workflow-id")?;
            if args.has("queue") {
                let job_id = state
                    .job_queue
                    .enqueue(JobType::Rollback, json!({ "workflow_id": workflow_id }))?;
                return print_json(&json!({ "job_id": job_id }));
            }
            print_json(&state.rollback.execute_rollback(workflow_id)?)
        }
        "worker" => {
            let worker = state.worker();
            if args.has("once") {
                let processed = worker.run_once().await?;
                return print_json(&json!({ "job_id": processed }));
            }

            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("收到停止信号");
                    let _ = tx.send(true);
                }
            });
            worker.run(rx).await;
            Ok(())
        }
        "jobs" => print_json(&state.job_queue.list_jobs()?),
        "job" => print_json(&state.job_queue.get_status(args.arg(0, "job-id")?)?),
        "job-cancel" => {
            let job_id = args.arg(0, "job-id")?;
            state.job_queue.cancel(job_id)?;
            print_json(&state.job_queue.get_status(job_id)?)
        }
        "job-retry" => {
            let new_id = state.job_queue.retry(args.arg(0, "job-id")?)?;
            print_json(&json!({ "job_id": new_id }))
        }
        "config-set" => {
            let key = args.arg(0, "key")?;
            let value = args.arg(1, "value")?;
            state
                .config_manager
                .set_global_config_value(key, value)
                .map_err(|e| anyhow!("配置写入失败: {}", e))?;
            print_json(&json!({ key: value }))
        }
        "config-show" => print_json(&state.config),
        other => bail!("未知命令: {}\n\n{}", other, USAGE),
    }
}
