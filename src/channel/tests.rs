use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use super::*;
use crate::chain::{Stage, Step};
use crate::config::QueuePolicy;
use crate::stages::{UpperCase, WaitForBytes};

const WAIT: Duration = Duration::from_secs(5);

fn pair(buffer: usize) -> (Channel, DuplexStream) {
    pair_with(buffer, ChannelConfig::default())
}

fn pair_with(buffer: usize, config: ChannelConfig) -> (Channel, DuplexStream) {
    let (client, server) = tokio::io::duplex(buffer);
    (Channel::from_stream(Box::new(client), config), server)
}

/// Stage that reports every payload it sees and passes it on.
fn observe() -> (
    impl Fn(Bytes, Option<Error>) -> Step + Send + Sync + 'static,
    UnboundedReceiver<Vec<u8>>,
) {
    let (tx, rx) = unbounded_channel();
    let stage = move |data: Bytes, err: Option<Error>| {
        let _ = tx.send(data.to_vec());
        Step::pass(data).with_error(err)
    };
    (stage, rx)
}

async fn next(rx: &mut UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("stage not reached")
        .expect("stage dropped")
}

#[tokio::test]
async fn test_identity_chain_sees_every_byte_once() {
    let (channel, mut peer) = pair(1024);
    let (observer, mut seen) = observe();
    let done = channel.read(Chain::new().with_fn(observer)).unwrap();

    for chunk in [&b"ab"[..], b"cde", b"f", b"ghij"] {
        peer.write_all(chunk).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    drop(peer);
    tokio::time::timeout(WAIT, done).await.unwrap().unwrap();

    let mut received = Vec::new();
    while let Ok(pass) = seen.try_recv() {
        received.extend(pass);
    }
    assert_eq!(received, b"abcdefghij");
    assert!(channel.is_closed());
}

#[tokio::test]
async fn test_held_bytes_are_offered_again() {
    let (channel, mut peer) = pair(1024);
    let (prefix_tx, mut prefixes) = unbounded_channel();
    let (observer, mut passed) = observe();
    let gate = move |data: Bytes, err: Option<Error>| {
        let _ = prefix_tx.send(data.to_vec());
        WaitForBytes(6).apply(data, err)
    };
    channel
        .read(Chain::new().with_fn(gate).with_fn(observer))
        .unwrap();

    for chunk in [&b"ab"[..], b"cd", b"ef"] {
        peer.write_all(chunk).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(next(&mut passed).await, b"abcdef");

    let mut last: Vec<u8> = Vec::new();
    while let Ok(prefix) = prefixes.try_recv() {
        assert!(prefix.len() > last.len());
        assert!(prefix.starts_with(&last));
        assert!(b"abcdef".starts_with(&prefix));
        last = prefix;
    }
    assert_eq!(last, b"abcdef");

    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_remove_read_stage() {
    let (channel, _peer) = pair(64);
    channel
        .read(Chain::new().with(UpperCase).with(WaitForBytes(1)).with(UpperCase))
        .unwrap();

    assert!(matches!(channel.remove_read_stage(3), Err(Error::InvalidIndex(3))));
    channel.remove_read_stage(1).unwrap();
    assert_eq!(channel.read_stage_count(), 2);
    channel.remove_read_stage(0).unwrap();
    assert!(matches!(channel.remove_read_stage(0), Err(Error::EmptyChain)));
    assert_eq!(channel.read_stage_count(), 1);

    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_stage_can_remove_itself() {
    let (channel, mut peer) = pair(64);
    let (observer, mut seen) = observe();
    let handle = channel.downgrade();
    let shout = move |data: Bytes, err: Option<Error>| {
        if let Some(channel) = handle.upgrade() {
            channel.remove_read_stage(0).unwrap();
        }
        UpperCase.apply(data, err)
    };
    channel
        .read(Chain::new().with_fn(shout).with_fn(observer))
        .unwrap();

    peer.write_all(b"first").await.unwrap();
    assert_eq!(next(&mut seen).await, b"FIRST");
    peer.write_all(b"second").await.unwrap();
    assert_eq!(next(&mut seen).await, b"second");

    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_write_without_stages() {
    let (channel, mut peer) = pair(64);
    let (tx, rx) = tokio::sync::oneshot::channel();
    channel
        .write("Hi", move |result| {
            let _ = tx.send(result);
        })
        .await
        .unwrap();

    let written = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    assert_eq!(written.unwrap(), 2);

    let mut buf = [0u8; 2];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"Hi");

    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_write_chain_holds_until_enough_bytes() {
    let (channel, mut peer) = pair(64);
    let writer = channel.writer(Chain::new().with(WaitForBytes(5)).with(UpperCase));

    assert_eq!(writer.send("ab").await.unwrap(), 0);
    assert_eq!(writer.send("cde").await.unwrap(), 5);

    let mut buf = [0u8; 5];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ABCDE");

    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_writers_do_not_share_accumulators() {
    let (channel, mut peer) = pair(64);
    let gated = channel.writer(Chain::new().with(WaitForBytes(4)));
    let plain = channel.writer(Chain::new());

    assert_eq!(gated.send("xy").await.unwrap(), 0);
    assert_eq!(plain.send("123").await.unwrap(), 3);
    assert_eq!(gated.send("zw").await.unwrap(), 4);

    let mut buf = [0u8; 7];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"123xyzw");

    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_write_stage_error_reaches_callback() {
    let (channel, _peer) = pair(64);
    let writer = channel.writer(
        Chain::new().with_fn(|data, _| Step::pass(data).with_error(Some(Error::Timeout))),
    );

    assert!(matches!(writer.send("x").await, Err(Error::Timeout)));
    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_round_trip_through_uppercase() {
    let (channel, mut peer) = pair(1024);

    let server = tokio::spawn(async move {
        let mut buf = vec![0u8; 1024];
        let n = peer.read(&mut buf).await.unwrap();
        let mut reply = b"Hello ".to_vec();
        reply.extend_from_slice(&buf[..n]);
        peer.write_all(&reply).await.unwrap();
        peer
    });

    let (observer, mut seen) = observe();
    channel
        .read(Chain::new().with(UpperCase).with_fn(observer))
        .unwrap();
    let writer = channel.writer(Chain::new().with(UpperCase));
    assert_eq!(writer.send("World").await.unwrap(), 5);

    assert_eq!(next(&mut seen).await, b"HELLO WORLD");

    let _peer = server.await.unwrap();
    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_stage_echoes_with_try_write() {
    let (channel, mut peer) = pair(64);
    let writer = channel.writer(Chain::new().with(UpperCase));
    let echo = move |data: Bytes, err: Option<Error>| {
        let mut reply = b"hello ".to_vec();
        reply.extend_from_slice(&data);
        writer.try_write(reply, |_| {}).unwrap();
        Step::pass(data).with_error(err)
    };
    channel.read(Chain::new().with_fn(echo)).unwrap();

    peer.write_all(b"bob").await.unwrap();
    let mut buf = [0u8; 9];
    tokio::time::timeout(WAIT, peer.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"HELLO BOB");

    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_close_flushes_pending_writes() {
    let (channel, mut peer) = pair(1024);
    let completed = Arc::new(AtomicUsize::new(0));

    for chunk in ["one ", "two ", "three"] {
        let completed = Arc::clone(&completed);
        channel
            .write(chunk, move |result| {
                assert!(result.is_ok());
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
    }
    channel.close().await.unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 3);

    let mut received = String::new();
    peer.read_to_string(&mut received).await.unwrap();
    assert_eq!(received, "one two three");
}

#[tokio::test]
async fn test_close_waits_for_slow_reader() {
    let (channel, mut peer) = pair(4);
    let reader = tokio::spawn(async move {
        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        received
    });

    let failed = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let failed = Arc::clone(&failed);
        channel
            .write([7u8; 8], move |result| {
                if result.is_err() {
                    failed.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();
    }
    channel.close().await.unwrap();

    assert_eq!(failed.load(Ordering::SeqCst), 0);
    let received = tokio::time::timeout(WAIT, reader).await.unwrap().unwrap();
    assert_eq!(received, vec![7u8; 24]);
}

#[tokio::test(start_paused = true)]
async fn test_close_gives_up_on_stalled_peer() {
    let config = ChannelConfig {
        write_timeout_secs: 1,
        ..Default::default()
    };
    // The peer never reads, so the first write stalls on the 4 byte pipe.
    let (channel, _peer) = pair_with(4, config);
    let completed = Arc::new(AtomicUsize::new(0));
    let timed_out = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let completed = Arc::clone(&completed);
        let timed_out = Arc::clone(&timed_out);
        let closed = Arc::clone(&closed);
        channel
            .write([7u8; 8], move |result| {
                match result {
                    Err(Error::Timeout) => timed_out.fetch_add(1, Ordering::SeqCst),
                    Err(Error::ChannelClosed) => closed.fetch_add(1, Ordering::SeqCst),
                    _ => 0,
                };
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
    }

    tokio::time::timeout(WAIT, channel.close())
        .await
        .expect("close blocked on a stalled write")
        .unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 5);
    assert!(timed_out.load(Ordering::SeqCst) >= 1);
    assert_eq!(
        timed_out.load(Ordering::SeqCst) + closed.load(Ordering::SeqCst),
        5
    );
}

#[tokio::test(start_paused = true)]
async fn test_write_timeout_moves_on_to_next_job() {
    let config = ChannelConfig {
        write_timeout_secs: 1,
        ..Default::default()
    };
    let (channel, mut peer) = pair_with(4, config);
    let writer = channel.writer(Chain::new());

    // Only the first 4 bytes fit before the deadline; they stay on the wire.
    assert!(matches!(writer.send([7u8; 8]).await, Err(Error::Timeout)));
    assert!(!channel.is_closed());

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 8];
        peer.read_exact(&mut buf).await.unwrap();
        (buf, peer)
    });
    assert_eq!(writer.send([9u8; 4]).await.unwrap(), 4);

    let (buf, _peer) = reader.await.unwrap();
    assert_eq!(buf, [7, 7, 7, 7, 9, 9, 9, 9]);
    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_one_shot() {
    let (channel, mut peer) = pair(64);
    channel.close().await.unwrap();
    channel.close().await.unwrap();
    assert!(channel.is_closed());

    let mut buf = Vec::new();
    assert_eq!(peer.read_to_end(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_write_after_close_fails() {
    let (channel, _peer) = pair(64);
    channel.close().await.unwrap();

    let result = channel.write("late", |_| panic!("callback of rejected write")).await;
    assert!(matches!(result, Err(Error::ChannelClosed)));
    assert!(matches!(
        channel.writer(Chain::new()).try_write("late", |_| {}),
        Err(Error::ChannelClosed)
    ));
}

#[tokio::test]
async fn test_read_twice_fails() {
    let (channel, _peer) = pair(64);
    channel.read(Chain::new()).unwrap();
    assert!(matches!(channel.read(Chain::new()), Err(Error::ReaderTaken)));

    channel.close().await.unwrap();
    assert!(matches!(channel.read(Chain::new()), Err(Error::ChannelClosed)));
}

#[tokio::test]
async fn test_close_stops_silent_read_loop() {
    let (channel, _peer) = pair(64);
    let done = channel.read(Chain::new()).unwrap();

    channel.close().await.unwrap();
    tokio::time::timeout(WAIT, done).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_set_read_stages_replaces_chain() {
    let (channel, mut peer) = pair(64);
    let (first, mut first_seen) = observe();
    let (second, mut second_seen) = observe();
    channel.read(Chain::new().with_fn(first)).unwrap();

    peer.write_all(b"a").await.unwrap();
    assert_eq!(next(&mut first_seen).await, b"a");

    channel.set_read_stages(Chain::new().with_fn(second));
    peer.write_all(b"b").await.unwrap();
    assert_eq!(next(&mut second_seen).await, b"b");
    assert!(first_seen.try_recv().is_err());

    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_reject_policy_reports_full_queue() {
    let config = ChannelConfig {
        queue_capacity: 1,
        queue_policy: QueuePolicy::Reject,
        ..Default::default()
    };
    let (channel, _peer) = pair_with(1, config);

    // Taken by the write loop, which then stalls on the 1 byte pipe.
    channel.write([1u8; 8], |_| {}).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Fills the queue.
    channel.write([2u8; 8], |_| {}).await.unwrap();

    assert!(matches!(
        channel.write([3u8; 8], |_| {}).await,
        Err(Error::QueueFull)
    ));
    channel.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_read_timeout_is_retried() {
    let config = ChannelConfig {
        read_timeout_secs: 1,
        ..Default::default()
    };
    let (channel, mut peer) = pair_with(64, config);
    let (observer, mut seen) = observe();
    channel.read(Chain::new().with_fn(observer)).unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!channel.is_closed());

    peer.write_all(b"late").await.unwrap();
    assert_eq!(next(&mut seen).await, b"late");

    channel.close().await.unwrap();
}

/// Stream whose reads always fail and whose writes always succeed.
struct BrokenReads;

impl AsyncRead for BrokenReads {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::InvalidData, "corrupted")))
    }
}

impl AsyncWrite for BrokenReads {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_read_error_is_handed_to_chain_once() {
    let channel = Channel::from_stream(Box::new(BrokenReads), ChannelConfig::default());
    let (tx, mut errors) = unbounded_channel();
    let done = channel
        .read(Chain::new().with_fn(move |data, err| {
            let kind = match &err {
                Some(Error::Io(e)) => Some(e.kind()),
                _ => None,
            };
            let _ = tx.send((data.len(), kind));
            Step::pass(data).with_error(err)
        }))
        .unwrap();

    tokio::time::timeout(WAIT, done).await.unwrap().unwrap();
    assert_eq!(
        errors.try_recv().unwrap(),
        (0, Some(io::ErrorKind::InvalidData))
    );
    assert!(errors.try_recv().is_err());
    assert!(channel.is_closed());
    channel.close().await.unwrap();
}

#[tokio::test]
async fn test_dropping_last_handle_closes_connection() {
    let (channel, mut peer) = pair(64);
    drop(channel);

    let mut buf = Vec::new();
    let read = tokio::time::timeout(WAIT, peer.read_to_end(&mut buf)).await;
    assert_eq!(read.unwrap().unwrap(), 0);
}

#[tokio::test]
async fn test_weak_handle_does_not_keep_channel_open() {
    let (channel, mut peer) = pair(64);
    let handle = channel.downgrade();
    let stage = move |data: Bytes, err: Option<Error>| {
        let _ = handle.upgrade().map(|c| c.read_stage_count());
        Step::pass(data).with_error(err)
    };
    let done = channel.read(Chain::new().with_fn(stage)).unwrap();
    let weak = channel.downgrade();
    drop(channel);

    let mut buf = Vec::new();
    let read = tokio::time::timeout(WAIT, peer.read_to_end(&mut buf)).await;
    assert_eq!(read.unwrap().unwrap(), 0);
    tokio::time::timeout(WAIT, done).await.unwrap().unwrap();
    assert!(weak.upgrade().is_none());
}
