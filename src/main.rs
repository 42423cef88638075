use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use liveupdater_core::companion::{Acquire, Delivery};
use liveupdater_core::config::HostConfig;
use liveupdater_core::console;
use liveupdater_core::context::HostContext;
use liveupdater_core::ipc::IPCServer;
use liveupdater_core::python_env::PythonEnv;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    tracing::info!("LiveUpdater host starting");

    let cfg = HostConfig::load()?;
    let python = Arc::new(PythonEnv::new(&cfg.data_dir));
    let ctx = Arc::new(HostContext::new(&cfg, python.clone()));

    ctx.load_modules().await;

    // 컴패니언: 아티팩트는 초기화 경로에서, 인터프리터는 별도 태스크에서
    if cfg.companion.enabled {
        match Delivery::from_config(&cfg, python.clone()) {
            Ok(delivery) if delivery.runs_inline() => {
                ctx.companion.start_or_log(&delivery).await;
            }
            Ok(delivery) => {
                let companion = ctx.companion.clone();
                tokio::spawn(async move {
                    tracing::info!("Preparing companion in background ({})", delivery.describe());
                    companion.start_or_log(&delivery).await;
                });
            }
            Err(e) => tracing::error!("Companion disabled: {}", e),
        }
    } else {
        tracing::info!("Companion disabled by config");
    }

    // 예약 태스크 틱
    let tick_ctx = ctx.clone();
    let tick_every = Duration::from_millis(cfg.tick_interval_ms.max(10));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_every);
        loop {
            interval.tick().await;
            tick_ctx.tick().await;
        }
    });

    // 운영자 콘솔 (stdin)
    let console_ctx = ctx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let reply = console::execute(&console_ctx, &line).await;
                    println!("{}", reply.message);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Console input closed: {}", e);
                    break;
                }
            }
        }
    });

    if let Some(addr) = cfg.ipc_listen.clone() {
        let server = IPCServer::new(ctx.clone(), &addr);
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                tracing::error!("IPC server error: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    // 중계만 멈춤. 컴패니언 프로세스는 그대로 둔다
    ctx.companion.shutdown();

    tracing::info!("LiveUpdater host shutting down");
    Ok(())
}
