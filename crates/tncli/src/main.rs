//! 終端機 Telnet 客戶端

mod args;
mod config;
mod terminal;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tncore::{SessionIo, TelnetClient, WireTrace};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use args::Args;
use config::Settings;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // 初始化日誌（輸出到 stderr，避免與遠端輸出混在一起）
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .init();

    if let Some(path) = &args.trace_file {
        WireTrace::init(path)
            .with_context(|| format!("無法建立追蹤檔 {}", path.display()))?;
        tracing::info!("線路追蹤寫入 {}", path.display());
    }

    let settings = Settings::resolve(&args)?;
    let timeout = settings.connect_timeout;

    let cancel = CancellationToken::new();
    let (client, io) = TelnetClient::new(settings.endpoint, settings.credentials, settings.telnet);
    let client = client.with_cancellation(cancel.clone());
    let endpoint = client.endpoint().clone();

    if args.probe {
        let open = client.is_open(timeout).await;
        println!("{} {}", endpoint, if open { "open" } else { "closed" });
        return Ok(if open {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    if client.is_auth() {
        tracing::info!("將以帳號密碼登入 {}", endpoint);
    }
    spawn_signal_watcher(cancel.clone());

    let SessionIo { commands, output } = io;
    let stdin = std::io::BufReader::new(std::io::stdin());
    terminal::spawn_input_collector(stdin, commands, cancel.clone())
        .context("無法啟動輸入執行緒")?;
    let display = tokio::spawn(terminal::render_output(output, tokio::io::stdout()));

    let end = client
        .telnet(timeout)
        .await
        .with_context(|| format!("與 {} 的連線失敗", endpoint))?;

    match display.await {
        Ok(Err(e)) => tracing::warn!("輸出失敗: {}", e),
        Err(e) => tracing::warn!("輸出任務異常結束: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!("對話正常結束（{:?}）", end);
    Ok(ExitCode::SUCCESS)
}

/// 將 Ctrl+C 與 SIGTERM 轉為取消信號
fn spawn_signal_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("無法註冊 SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            result = ctrl_c => {
                if let Err(e) = result {
                    tracing::warn!("無法註冊 Ctrl+C: {}", e);
                    return;
                }
                tracing::info!("收到 Ctrl+C，結束連線...");
            }
            _ = terminate => {
                tracing::info!("收到 SIGTERM，結束連線...");
            }
        }

        cancel.cancel();
    });
}
