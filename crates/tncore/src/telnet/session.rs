//! 連線期間的收發迴圈
//!
//! 背景讀取任務把遠端資料解碼後送進輸出 channel；前景迴圈同時等待
//! 取消信號、讀取任務結束以及待送命令，三者任一先發生就處理。

use std::io;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::encoding::{Charset, InboundDecoder};
use crate::trace::WireTrace;

/// 連線期間的錯誤
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("發送命令失敗: {0}")]
    Write(#[source] io::Error),

    #[error("讀取錯誤: {0}")]
    Read(#[source] io::Error),
}

/// 正常結束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// 收到取消信號
    Cancelled,
    /// 遠端關閉連線
    RemoteClosed,
    /// 輸出 channel 的接收端已關閉
    FeedClosed,
}

/// 讀取任務的結束原因
#[derive(Debug)]
enum ReaderExit {
    Cancelled,
    Eof,
    FeedClosed,
    Failed(io::Error),
}

/// 收發迴圈設定
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub charset: Charset,
    pub read_buffer_size: usize,
}

/// 執行收發迴圈直到取消、寫入失敗或讀取端結束
///
/// 每個命令寫出時會加上 `\n`。所有命令發送端都關閉後不再等待命令，
/// 但仍持續轉送遠端資料。任何結束路徑都會取消讀取任務並關閉連線。
pub async fn run_session<S>(
    stream: S,
    mut commands: mpsc::UnboundedReceiver<String>,
    output: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    options: SessionOptions,
) -> Result<SessionEnd, SessionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);

    let reader_cancel = cancel.child_token();
    let mut reader_task: JoinHandle<ReaderExit> = tokio::spawn(read_loop(
        reader,
        output,
        reader_cancel.clone(),
        options.charset.decoder(),
        options.read_buffer_size,
    ));
    let mut reader_finished = false;
    let mut commands_open = true;

    let result = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("收到取消信號，結束連線");
                break Ok(SessionEnd::Cancelled);
            }

            exit = &mut reader_task => {
                reader_finished = true;
                break match exit {
                    Ok(ReaderExit::Eof) => {
                        info!("遠端已關閉連線");
                        Ok(SessionEnd::RemoteClosed)
                    }
                    Ok(ReaderExit::FeedClosed) => Ok(SessionEnd::FeedClosed),
                    Ok(ReaderExit::Cancelled) => Ok(SessionEnd::Cancelled),
                    Ok(ReaderExit::Failed(e)) => Err(SessionError::Read(e)),
                    Err(e) => Err(SessionError::Read(io::Error::new(io::ErrorKind::Other, e))),
                };
            }

            command = commands.recv(), if commands_open => {
                match command {
                    Some(command) => {
                        // 對方不讀取時寫入可能一直阻塞，仍要回應取消
                        let sent = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                info!("收到取消信號，放棄發送中的命令");
                                break Ok(SessionEnd::Cancelled);
                            }
                            sent = send_line(&mut writer, &command, options.charset) => sent,
                        };
                        if let Err(e) = sent {
                            error!("發送命令失敗: {}", e);
                            break Err(SessionError::Write(e));
                        }
                    }
                    None => {
                        debug!("命令來源已關閉，僅轉送遠端輸出");
                        commands_open = false;
                    }
                }
            }
        }
    };

    reader_cancel.cancel();
    if let Err(e) = writer.shutdown().await {
        debug!("關閉寫入端失敗: {}", e);
    }
    if !reader_finished {
        let _ = reader_task.await;
    }

    result
}

async fn send_line<W>(writer: &mut W, command: &str, charset: Charset) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = charset.encode(command);
    line.push(b'\n');
    WireTrace::log_bytes("SEND", &line);

    writer.write_all(&line).await?;
    writer.flush().await?;

    debug!("已發送: {}", command);
    Ok(())
}

async fn read_loop<R>(
    mut reader: R,
    output: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    mut decoder: InboundDecoder,
    buffer_size: usize,
) -> ReaderExit
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(buffer_size);

    loop {
        buf.clear();
        buf.reserve(buffer_size);

        let result = tokio::select! {
            _ = cancel.cancelled() => return ReaderExit::Cancelled,
            result = reader.read_buf(&mut buf) => result,
        };

        let text = match result {
            Ok(0) => {
                let rest = decoder.finish();
                if !rest.is_empty() {
                    let _ = output.send(rest);
                }
                return ReaderExit::Eof;
            }
            Ok(_) => {
                WireTrace::log_bytes("RECV", &buf);
                decoder.decode(&buf)
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    return ReaderExit::Cancelled;
                }
                error!("讀取錯誤: {}", e);
                return ReaderExit::Failed(e);
            }
        };

        if text.is_empty() {
            continue;
        }
        if output.send(text).is_err() {
            warn!("接收端已關閉");
            return ReaderExit::FeedClosed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{duplex, ReadBuf};
    use tokio::time::timeout;

    fn options() -> SessionOptions {
        SessionOptions {
            charset: Charset::Utf8,
            read_buffer_size: 1024,
        }
    }

    /// 讀取永遠等待、寫入一律失敗的傳輸層
    struct BrokenTransport {
        write_attempts: Arc<AtomicUsize>,
    }

    impl AsyncRead for BrokenTransport {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for BrokenTransport {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.write_attempts.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_commands_written_in_order() {
        let (client, mut server) = duplex(1024);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = tokio::spawn(run_session(client, cmd_rx, out_tx, cancel.clone(), options()));

        cmd_tx.send("show version".to_string()).unwrap();
        cmd_tx.send("exit".to_string()).unwrap();

        let expected = b"show version\nexit\n";
        let mut received = vec![0u8; expected.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        cancel.cancel();
        let end = session.await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Cancelled);

        // 沒有第三筆資料，只剩 EOF
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_inbound_chunks_reach_output() {
        let (client, mut server) = duplex(1024);
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = tokio::spawn(run_session(client, cmd_rx, out_tx, cancel.clone(), options()));

        server.write_all(b"Router>").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), "Router>");

        cancel.cancel();
        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_closes_transport_promptly() {
        let (client, mut server) = duplex(1024);
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = tokio::spawn(run_session(client, cmd_rx, out_tx, cancel.clone(), options()));
        tokio::task::yield_now().await;

        cancel.cancel();
        let end = timeout(Duration::from_millis(100), session)
            .await
            .expect("session did not stop after cancellation")
            .unwrap()
            .unwrap();
        assert_eq!(end, SessionEnd::Cancelled);

        let mut buf = [0u8; 8];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_blocked_write() {
        // 緩衝區很小且對方從不讀取，寫入會卡住
        let (client, _server) = duplex(16);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = tokio::spawn(run_session(client, cmd_rx, out_tx, cancel.clone(), options()));
        cmd_tx.send("x".repeat(1000)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!session.is_finished());

        cancel.cancel();
        let end = timeout(Duration::from_millis(500), session)
            .await
            .expect("session did not stop while a write was pending")
            .unwrap()
            .unwrap();
        assert_eq!(end, SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (client, _server) = duplex(1024);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        cmd_tx.send("exit".to_string()).unwrap();

        let end = run_session(client, cmd_rx, out_tx, cancel, options()).await.unwrap();
        assert_eq!(end, SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_write_failure_stops_session() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let transport = BrokenTransport {
            write_attempts: attempts.clone(),
        };
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        cmd_tx.send("show version".to_string()).unwrap();
        cmd_tx.send("exit".to_string()).unwrap();

        let result = run_session(transport, cmd_rx, out_tx, CancellationToken::new(), options()).await;

        assert!(matches!(result, Err(SessionError::Write(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_close_ends_session() {
        let (client, mut server) = duplex(1024);
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        let session = tokio::spawn(run_session(
            client,
            cmd_rx,
            out_tx,
            CancellationToken::new(),
            options(),
        ));

        server.write_all(b"bye\r\n").await.unwrap();
        drop(server);

        let end = session.await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::RemoteClosed);
        assert_eq!(out_rx.recv().await.unwrap(), "bye\r\n");
    }

    #[tokio::test]
    async fn test_closed_command_source_keeps_relaying() {
        let (client, mut server) = duplex(1024);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        let session = tokio::spawn(run_session(
            client,
            cmd_rx,
            out_tx,
            CancellationToken::new(),
            options(),
        ));

        cmd_tx.send("exit".to_string()).unwrap();
        drop(cmd_tx);

        let mut received = [0u8; 5];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"exit\n");

        server.write_all(b"Connection closed").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), "Connection closed");
        drop(server);

        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::RemoteClosed);
    }

    #[tokio::test]
    async fn test_dropped_output_receiver_ends_session() {
        let (client, mut server) = duplex(1024);
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        drop(out_rx);

        let session = tokio::spawn(run_session(
            client,
            cmd_rx,
            out_tx,
            CancellationToken::new(),
            options(),
        ));

        server.write_all(b"banner").await.unwrap();
        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::FeedClosed);
    }

    #[tokio::test]
    async fn test_big5_output_decoded() {
        let (client, mut server) = duplex(1024);
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let options = SessionOptions {
            charset: Charset::Big5,
            read_buffer_size: 1024,
        };

        let session = tokio::spawn(run_session(client, cmd_rx, out_tx, cancel.clone(), options));

        server.write_all(&[0xa7, 0x41, 0xa6, 0x6e]).await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), "你好");

        cancel.cancel();
        session.await.unwrap().unwrap();
    }
}
