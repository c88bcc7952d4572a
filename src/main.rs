use backuptools::db::{BatchStore, RemoteCacheStore};
use backuptools::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use backuptools::{AppState, BackupEngine, BackupJob, EngineConfig};
use tracing_subscriber::prelude::*;

/// 初始化日志系统
fn init_logging() {
    let log_dir = get_log_dir();
    let _ = std::fs::create_dir_all(&log_dir);

    let config = LogConfig::load(&log_dir);

    if !config.enabled {
        let subscriber = tracing_subscriber::registry();
        let _ = tracing::subscriber::set_global_default(subscriber);
        return;
    }

    let level = config.tracing_level();
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("sqlx=warn".parse().unwrap())
        .add_directive("opendal=warn".parse().unwrap());

    if let Ok(file_writer) = SizeRotatingWriter::new(&log_dir, config.max_size_mb) {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_target(false);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        // 文件日志创建失败，回退到控制台
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

fn print_usage() {
    eprintln!("用法:");
    eprintln!("  backuptools jobs                      列出全部任务");
    eprintln!("  backuptools plan <job-id> [--cached]  计算差异并生成新批次");
    eprintln!("  backuptools run <job-id> [batch-id]   执行批次（缺省为最近批次）");
    eprintln!("  backuptools history <job-id>          查看执行历史");
    eprintln!("  backuptools clear-cache <job-id>      清空任务的远端缓存");
}

async fn engine_for_job(state: &AppState, job_id: &str) -> anyhow::Result<BackupEngine> {
    let job = BackupJob::load(&state.db, job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("任务不存在: {}", job_id))?;
    let store = backuptools::storage::create_store(&job.store_config)?;
    let retry = EngineConfig::load(&state.config_dir).retry_policy();
    Ok(BackupEngine::new(state.db.clone(), store).with_retry(retry))
}

async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let Some(cmd) = args.first() else {
        print_usage();
        return Ok(());
    };

    let state = AppState::new().await?;

    let result = dispatch(&state, cmd, &args[1..]).await;
    state.cleanup().await;
    result
}

async fn dispatch(state: &AppState, cmd: &str, args: &[String]) -> anyhow::Result<()> {
    match cmd {
        "jobs" => {
            let jobs = BackupJob::load_all(&state.db).await?;
            if jobs.is_empty() {
                println!("没有任务");
            }
            for job in jobs {
                println!(
                    "{}  {}  {} -> s3://{}/{}",
                    job.id, job.name, job.local_root, job.bucket, job.remote_prefix
                );
            }
            Ok(())
        }
        "plan" => {
            let job_id = args
                .first()
                .ok_or_else(|| anyhow::anyhow!("缺少参数: job-id"))?;
            let use_cache = args.iter().any(|a| a == "--cached");

            let engine = engine_for_job(state, job_id).await?;
            let batch_id = engine.plan(job_id, use_cache).await?;
            println!("批次已创建: {}", batch_id);
            Ok(())
        }
        "run" => {
            let job_id = args
                .first()
                .ok_or_else(|| anyhow::anyhow!("缺少参数: job-id"))?;
            let engine = engine_for_job(state, job_id).await?;

            let batch_store = BatchStore::new(state.db.clone());
            let batch_id = match args.get(1) {
                Some(id) => id.clone(),
                None => batch_store
                    .latest_batch_id(job_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("任务没有可执行的批次，请先运行 plan"))?,
            };

            // 进度是只读观察者，不消费也不影响传输
            let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(64);
            let printer = tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    println!("{}", msg);
                }
            });

            let summary = engine.run(job_id, &batch_id, Some(tx)).await?;
            let _ = printer.await;

            println!(
                "执行完成: 上传 {}/{} 成功, 删除 {}/{} 成功, {} 字节, 耗时 {}s{}",
                summary.uploads_completed,
                summary.uploads_attempted,
                summary.deletes_completed,
                summary.deletes_attempted,
                summary.bytes_uploaded,
                summary.elapsed_secs,
                if summary.ended_by_max_runtime {
                    " (达到最大运行时长，剩余项保留待下次执行)"
                } else {
                    ""
                }
            );
            Ok(())
        }
        "history" => {
            let job_id = args
                .first()
                .ok_or_else(|| anyhow::anyhow!("缺少参数: job-id"))?;
            let logs = BatchStore::new(state.db.clone())
                .list_run_logs(job_id, 20)
                .await?;
            if logs.is_empty() {
                println!("没有执行记录");
            }
            for log in logs {
                println!(
                    "{}  批次 {}  上传 {} 成功 {} 失败, 删除 {} 成功 {} 失败, {} 字节{}",
                    log.start_time,
                    log.batch_id,
                    log.uploads_completed,
                    log.uploads_failed,
                    log.deletes_completed,
                    log.deletes_failed,
                    log.bytes_uploaded,
                    if log.ended_by_max_runtime {
                        " (提前结束)"
                    } else {
                        ""
                    }
                );
            }
            Ok(())
        }
        "clear-cache" => {
            let job_id = args
                .first()
                .ok_or_else(|| anyhow::anyhow!("缺少参数: job-id"))?;
            let removed = RemoteCacheStore::new(state.db.clone())
                .clear_job(job_id)
                .await?;
            println!("已清空远端缓存: {} 个条目，下次规划请使用实时扫描", removed);
            Ok(())
        }
        _ => {
            print_usage();
            Err(anyhow::anyhow!("未知命令: {}", cmd))
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(args).await {
        eprintln!("错误: {:#}", e);
        std::process::exit(1);
    }
}
