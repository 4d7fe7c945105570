//! 終端機輸入輸出
//!
//! 標準輸入在獨立執行緒上阻塞讀取，避免 runtime 結束時卡在 stdin；
//! 遠端輸出依序寫到標準輸出。

use std::io::{self, BufRead};
use std::thread;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// 啟動輸入收集執行緒
pub fn spawn_input_collector<R>(
    input: R,
    commands: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) -> io::Result<thread::JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || collect_lines(input, &commands, &cancel))
}

/// 逐行讀取並送出命令（去除行尾空白與換行）
///
/// 輸入結束時直接返回，發送端隨之關閉；其他讀取錯誤會觸發取消。
pub fn collect_lines<R: BufRead>(
    mut input: R,
    commands: &mpsc::UnboundedSender<String>,
    cancel: &CancellationToken,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match input.read_line(&mut line) {
            Ok(0) => {
                debug!("標準輸入已結束");
                return;
            }
            Ok(_) => {
                let command = line.trim_end().to_string();
                if commands.send(command).is_err() {
                    debug!("連線已結束，停止讀取輸入");
                    return;
                }
            }
            Err(e) => {
                error!("讀取標準輸入失敗: {}", e);
                cancel.cancel();
                return;
            }
        }
    }
}

/// 將遠端輸出依序寫出，直到輸出 channel 關閉
pub async fn render_output<W>(
    mut output: mpsc::UnboundedReceiver<String>,
    mut sink: W,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = output.recv().await {
        sink.write_all(chunk.as_bytes()).await?;
        sink.flush().await?;
    }
    Ok(())
}
