use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use rivet::{
    Channel, ChannelFuture, ChannelHandler, ChannelHandlerContext, ChannelPipeline, EmbeddedChannel, EventLoop,
    EventSet, Result,
};
use rivet_executor::{EventLoopGroup, SingleThreadEventLoop};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Remembers which threads ran its callbacks.
#[derive(Default)]
struct ThreadRecorder {
    threads: Mutex<Vec<ThreadId>>,
}

impl ChannelHandler for ThreadRecorder {
    fn events(&self) -> EventSet {
        EventSet::CLOSE | EventSet::USER_EVENT_TRIGGERED
    }

    fn user_event_triggered(&self, ctx: &ChannelHandlerContext, event: rivet::UserEvent) -> Result<()> {
        self.threads.lock().push(thread::current().id());
        ctx.fire_user_event_triggered_boxed(event);
        Ok(())
    }

    fn close(&self, ctx: &ChannelHandlerContext, future: ChannelFuture) -> Result<()> {
        self.threads.lock().push(thread::current().id());
        ctx.close_with(future);
        Ok(())
    }
}

/// Occupies the loop until the returned sender is dropped or signalled.
fn block_loop(event_loop: &Arc<SingleThreadEventLoop>) -> mpsc::Sender<()> {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    event_loop
        .post(Box::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }))
        .unwrap();
    started_rx.recv().unwrap();
    release_tx
}

#[test]
fn test_outbound_request_from_foreign_thread_is_posted() {
    init_log();
    let group = EventLoopGroup::builder().threads(1).name("rivet-xthread").build().unwrap();
    let event_loop = group.next();

    let pipeline = ChannelPipeline::new();
    pipeline.add_last("thread-recorder", ThreadRecorder::default()).unwrap();
    let channel = EmbeddedChannel::with_event_loop(pipeline.clone(), event_loop.clone()).unwrap();

    let release = block_loop(&event_loop);
    let future = channel.close();
    assert!(!future.is_done(), "close must not run on the calling thread");

    release.send(()).unwrap();
    assert!(matches!(future.wait_timeout(Duration::from_secs(5)), Some(Ok(()))));
    assert!(!channel.is_active());

    let recorder = pipeline.get::<ThreadRecorder>().unwrap();
    assert_eq!(*recorder.threads.lock(), [event_loop.thread_id()]);
    group.shutdown_gracefully();
}

#[test]
fn test_inbound_events_keep_posting_order() {
    init_log();
    let group = EventLoopGroup::builder().threads(1).name("rivet-order").build().unwrap();
    let event_loop = group.next();

    let pipeline = ChannelPipeline::new();
    pipeline.add_last("thread-recorder", ThreadRecorder::default()).unwrap();
    let channel = EmbeddedChannel::with_event_loop(pipeline.clone(), event_loop.clone()).unwrap();

    for i in 0..10u32 {
        pipeline.fire_user_event_triggered(i);
    }
    let done = channel.flush();
    assert!(matches!(done.wait_timeout(Duration::from_secs(5)), Some(Ok(()))));

    let seen: Vec<u32> = channel
        .take_user_events()
        .into_iter()
        .filter_map(|event| event.downcast::<u32>().ok().map(|v| *v))
        .collect();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
    group.shutdown_gracefully();
}

#[test]
fn test_post_after_shutdown_fails_future() {
    init_log();
    let event_loop = SingleThreadEventLoop::start("rivet-closed", None).unwrap();
    let pipeline = ChannelPipeline::new();
    let channel = EmbeddedChannel::with_event_loop(pipeline, event_loop.clone()).unwrap();
    event_loop.shutdown();

    let future = channel.close();
    assert!(matches!(future.cause(), Some(rivet::Error::Closed)));
    assert!(!event_loop.in_loop_thread());
}

#[test]
fn test_future_can_be_awaited() {
    init_log();
    let group = EventLoopGroup::builder().threads(1).name("rivet-await").build().unwrap();
    let channel = EmbeddedChannel::with_event_loop(ChannelPipeline::new(), group.next()).unwrap();
    let future = channel.write(Box::new(String::from("payload")));
    futures::executor::block_on(future).unwrap();
    assert_eq!(channel.read_outbound::<String>().as_deref(), Some("payload"));
    group.shutdown_gracefully();
}
