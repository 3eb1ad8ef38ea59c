//! End-to-end gateway tests: request in, handler call, reply out.
//!
//! Drive `Processor::process` with real worker pools and a real event
//! loop, asserting on what the mock handler saw and what reached the
//! recording transport.

use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Duration;

use rpcbridge::bridge::callback::ForeignValue;
use rpcbridge::config::{DispatcherConfig, DispatcherKind};
use rpcbridge::dispatcher::{Priority, Task};
use rpcbridge::error::{CallbackError, DispatchError, HandlerError};
use rpcbridge::rpc::envelope::{self, MessageType, parse_message_begin};
use rpcbridge::rpc::header::{HEADER_EX, HEADER_EX_WHAT, Header, PRIORITY_HEADER, ProtocolId};
use rpcbridge::rpc::request::RequestState;
use rpcbridge::rpc::transform::{self, TransformId};

use crate::mock_handler::{Behavior, Harness, LOOP_NAME, MockHandler, single_worker, wait_until};

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Occupy the single worker until the returned sender fires.
fn block_worker(h: &Harness) -> mpsc::Sender<()> {
    let (tx, rx) = mpsc::channel::<()>();
    h.processor
        .dispatcher()
        .enqueue(Task::from_fn(Priority::HighImportant, move || {
            let _ = rx.recv();
        }))
        .map_err(|e| e.kind)
        .expect("blocker accepted");
    assert!(wait_until(Duration::from_secs(2), || {
        h.processor.dispatcher().pending_task_count() == 0
    }));
    tx
}

// ── Successful replies ───────────────────────────────────────

#[test]
fn compact_reply_is_written_on_the_loop_thread() {
    let mut h = Harness::new(MockHandler::new(Behavior::Inline(ForeignValue::Bytes(
        b"OK".to_vec(),
    ))));
    let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, 7);
    let status = req.status();

    h.processor.process(req).expect("accepted");
    h.drain();

    let writes = h.transport.writes.lock();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].frame, b"OK");
    assert_eq!(writes[0].thread.as_deref(), Some(LOOP_NAME));
    assert_eq!(status.get(), RequestState::Completed);
}

#[test]
fn handler_runs_on_a_worker_under_the_runtime_lock() {
    let mut h = Harness::new(MockHandler::echo());
    let mut header = Header::new(ProtocolId::Binary);
    header.set("trace_id", "abc123");
    let req = h.request_with(header, "echo", MessageType::Call, 1);

    h.processor.process(req).expect("accepted");
    h.drain();

    let calls = h.handler.dispatched.lock();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert!(call.lock_held);
    assert!(call.thread.as_deref().is_some_and(|t| t.starts_with("rpc-worker")));
    assert_eq!(call.identity, "svc-test");
    assert!(call.headers.contains(&("trace_id".into(), "abc123".into())));
    assert_eq!(envelope::method_name(&call.input, ProtocolId::Binary as i16), "echo");
}

#[test]
fn deferred_completion_from_another_thread() {
    let mut h = Harness::new(MockHandler::new(Behavior::Deferred));
    let req = h.request(ProtocolId::Compact, "slow", MessageType::Call, 3);
    let status = req.status();

    h.processor.process(req).expect("accepted");
    h.processor.shutdown(true);
    assert_eq!(status.get(), RequestState::Dispatched);

    let cb = h.handler.take_parked();
    std::thread::spawn(move || cb.call(ForeignValue::Bytes(b"late".to_vec())))
        .join()
        .expect("completer thread")
        .expect("first call wins");
    h.flush();

    let writes = h.transport.writes.lock();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].frame, b"late");
    assert_eq!(writes[0].thread.as_deref(), Some(LOOP_NAME));
    assert_eq!(status.get(), RequestState::Completed);
}

#[test]
fn second_callback_invocation_is_rejected() {
    let mut h = Harness::new(MockHandler::new(Behavior::Deferred));
    let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, 4);
    h.processor.process(req).expect("accepted");
    h.processor.shutdown(true);

    let cb = h.handler.take_parked();
    assert_eq!(cb.call(ForeignValue::Bytes(b"one".to_vec())), Ok(()));
    assert!(cb.is_completed());
    assert_eq!(
        cb.call(ForeignValue::Bytes(b"two".to_vec())),
        Err(CallbackError::AlreadyCompleted)
    );
    h.flush();

    assert_eq!(h.transport.frames(), vec![b"one".to_vec()]);
}

#[test]
fn exception_slots_are_copied_onto_reply_header() {
    let mut h = Harness::new(
        MockHandler::new(Behavior::Inline(ForeignValue::Bytes(b"partial".to_vec())))
            .with_exception("NotFound", "no such user"),
    );
    let req = h.request(ProtocolId::Binary, "lookup", MessageType::Call, 9);
    h.processor.process(req).expect("accepted");
    h.drain();

    let writes = h.transport.writes.lock();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].header.get(HEADER_EX), Some("NotFound"));
    assert_eq!(writes[0].header.get(HEADER_EX_WHAT), Some("no such user"));
}

#[test]
fn zlib_write_transform_applies_to_reply() {
    let payload = vec![b'z'; 4096];
    let mut h = Harness::new(MockHandler::new(Behavior::Inline(ForeignValue::Bytes(
        payload.clone(),
    ))));
    let mut header = Header::new(ProtocolId::Compact);
    header.set_write_transforms(vec![TransformId::Zlib]);
    header.set_min_compress_bytes(16);
    let req = h.request_with(header, "bulk", MessageType::Call, 5);

    h.processor.process(req).expect("accepted");
    h.drain();

    let frames = h.transport.frames();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].len() < payload.len());
    let back = transform::reverse(frames[0].clone(), &[TransformId::Zlib]).expect("inflate");
    assert_eq!(back, payload);
}

#[test]
fn snappy_and_zstd_replies_decode_with_advertised_stack() {
    let payload = b"0123456789abcdef".repeat(256);
    let mut h = Harness::new(MockHandler::new(Behavior::Inline(ForeignValue::Bytes(
        payload.clone(),
    ))));
    let stack = vec![TransformId::Snappy, TransformId::Zstd];
    let mut header = Header::new(ProtocolId::Compact);
    header.set_write_transforms(stack.clone());
    header.set_min_compress_bytes(16);
    let req = h.request_with(header, "bulk", MessageType::Call, 6);

    h.processor.process(req).expect("accepted");
    h.drain();

    let writes = h.transport.writes.lock();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].header.write_transforms(), stack.as_slice());
    let back = transform::reverse(writes[0].frame.clone(), &stack).expect("decode");
    assert_eq!(back, payload);
}

#[test]
fn unusable_transform_sends_plain_exception_without_advertising_it() {
    let mut h = Harness::new(MockHandler::new(Behavior::Inline(ForeignValue::Bytes(
        vec![b'q'; 4096],
    ))));
    let mut header = Header::new(ProtocolId::Binary);
    header.set_write_transforms(vec![TransformId::Qlz]);
    header.set_min_compress_bytes(16);
    let req = h.request_with(header, "bulk", MessageType::Call, 8);
    let status = req.status();

    h.processor.process(req).expect("accepted");
    h.drain();

    let writes = h.transport.writes.lock();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].header.write_transforms().is_empty());
    let begin = parse_message_begin(&writes[0].frame, ProtocolId::Binary).expect("plain frame");
    assert_eq!(begin.kind, MessageType::Exception);
    assert_eq!(begin.seq_id, 8);
    assert_eq!(status.get(), RequestState::Errored);
}

// ── Handler failures ─────────────────────────────────────────

#[test]
fn missing_result_becomes_exception_frame() {
    let mut h = Harness::new(MockHandler::new(Behavior::Inline(ForeignValue::None)));
    let req = h.request(ProtocolId::Binary, "echo", MessageType::Call, 11);
    let status = req.status();
    h.processor.process(req).expect("accepted");
    h.drain();

    let frames = h.transport.frames();
    assert_eq!(frames.len(), 1);
    let begin = parse_message_begin(&frames[0], ProtocolId::Binary).expect("exception frame");
    assert_eq!(begin.kind, MessageType::Exception);
    assert_eq!(begin.name, "echo");
    assert_eq!(begin.seq_id, 11);
    assert!(contains(&frames[0], b"Failed to read response from handler"));
    assert_eq!(status.get(), RequestState::Errored);
}

#[test]
fn wrong_return_type_becomes_exception_frame() {
    let mut h = Harness::new(MockHandler::new(Behavior::Inline(ForeignValue::Int(42))));
    let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, 12);
    h.processor.process(req).expect("accepted");
    h.drain();

    let frames = h.transport.frames();
    assert_eq!(frames.len(), 1);
    let begin = parse_message_begin(&frames[0], ProtocolId::Compact).expect("exception frame");
    assert_eq!(begin.kind, MessageType::Exception);
    assert_eq!(begin.seq_id, 12);
}

#[test]
fn dispatch_failure_answers_with_exception() {
    let mut h = Harness::new(MockHandler::new(Behavior::FailToStart(HandlerError::raised(
        "no such handler",
    ))));
    let req = h.request(ProtocolId::Binary, "echo", MessageType::Call, 13);
    let status = req.status();
    h.processor.process(req).expect("accepted");
    h.drain();

    let frames = h.transport.frames();
    assert_eq!(frames.len(), 1);
    assert!(contains(&frames[0], b"no such handler"));
    assert_eq!(status.get(), RequestState::Errored);
}

#[test]
fn inline_reply_stands_when_dispatch_then_fails() {
    let mut h = Harness::new(MockHandler::new(Behavior::ReplyThenFail(
        ForeignValue::Bytes(b"done".to_vec()),
        HandlerError::raised("late failure"),
    )));
    let req = h.request(ProtocolId::Binary, "echo", MessageType::Call, 15);
    let status = req.status();
    h.processor.process(req).expect("accepted");
    h.drain();

    assert_eq!(h.transport.frames(), vec![b"done".to_vec()]);
    assert_eq!(status.get(), RequestState::Completed);
}

#[test]
fn empty_bytes_drop_without_reply() {
    let mut h = Harness::new(MockHandler::new(Behavior::Inline(ForeignValue::Bytes(vec![]))));
    let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, 14);
    let status = req.status();
    h.processor.process(req).expect("accepted");
    h.drain();

    assert_eq!(h.transport.count(), 0);
    assert_eq!(status.get(), RequestState::Dropped);
}

#[test]
fn released_callback_drops_request() {
    let mut h = Harness::new(MockHandler::new(Behavior::Deferred));
    let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, 15);
    let status = req.status();
    h.processor.process(req).expect("accepted");
    h.processor.shutdown(true);

    h.handler.parked.lock().clear();
    h.flush();

    assert_eq!(h.transport.count(), 0);
    assert_eq!(status.get(), RequestState::Dropped);
}

// ── Oneway ───────────────────────────────────────────────────

#[test]
fn oneway_ping_never_replies() {
    let mut h = Harness::new(MockHandler::echo().with_oneway(&["ping"]));
    assert!(h.processor.oneway_registry().contains("ping"));

    let req = h.request(ProtocolId::Compact, "ping", MessageType::Oneway, 1);
    let status = req.status();
    h.processor.process(req).expect("accepted");
    h.drain();

    assert_eq!(h.handler.dispatch_count(), 1);
    assert_eq!(h.transport.count(), 0);
    assert_eq!(status.get(), RequestState::Completed);
}

#[test]
fn oneway_framed_as_call_gets_empty_ack() {
    let mut h = Harness::new(MockHandler::echo().with_oneway(&["ping"]));
    let req = h.request(ProtocolId::Binary, "ping", MessageType::Call, 2);
    h.processor.process(req).expect("accepted");
    h.drain();

    assert_eq!(h.handler.dispatch_count(), 1);
    assert_eq!(h.transport.frames(), vec![Vec::<u8>::new()]);
}

#[test]
fn oneway_ack_can_be_disabled() {
    let mut h = Harness::with_config(
        MockHandler::echo().with_oneway(&["ping"]),
        single_worker(),
        false,
    );
    let req = h.request(ProtocolId::Binary, "ping", MessageType::Call, 2);
    h.processor.process(req).expect("accepted");
    h.drain();

    assert_eq!(h.transport.count(), 0);
}

#[test]
fn raising_oneway_query_leaves_registry_empty() {
    let mut h = Harness::new(MockHandler::echo().with_oneway(&["ping"]).raising_oneway());
    assert!(h.processor.oneway_registry().is_empty());

    let req = h.request(ProtocolId::Compact, "ping", MessageType::Call, 3);
    h.processor.process(req).expect("accepted");
    h.drain();

    // Treated as two-way: the echo goes out.
    assert_eq!(h.transport.count(), 1);
}

// ── Connection state ─────────────────────────────────────────

#[test]
fn inactive_connection_before_dispatch_skips_handler() {
    let mut h = Harness::new(MockHandler::echo());
    h.conn.mark_inactive();
    let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, 1);
    let status = req.status();
    h.processor.process(req).expect("accepted");
    h.drain();

    assert_eq!(h.handler.dispatch_count(), 0);
    assert_eq!(h.transport.count(), 0);
    assert_eq!(status.get(), RequestState::Dropped);
}

#[test]
fn inactive_connection_after_dispatch_discards_reply() {
    let mut h = Harness::new(MockHandler::new(Behavior::Deferred));
    let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, 1);
    let status = req.status();
    h.processor.process(req).expect("accepted");
    h.processor.shutdown(true);

    h.conn.mark_inactive();
    assert_eq!(
        h.handler.take_parked().call(ForeignValue::Bytes(b"OK".to_vec())),
        Ok(())
    );
    h.flush();

    assert_eq!(h.handler.dispatch_count(), 1);
    assert_eq!(h.transport.count(), 0);
    assert_eq!(status.get(), RequestState::Dropped);
}

#[test]
fn failed_write_marks_connection_inactive() {
    let mut h = Harness::new(MockHandler::echo());
    h.transport.fail_writes.store(true, Ordering::SeqCst);
    let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, 1);
    h.processor.process(req).expect("accepted");
    h.drain();

    assert!(!h.conn.is_active());
}

// ── Priority ─────────────────────────────────────────────────

#[test]
fn priority_header_short_circuits_handler_rule() {
    let mut h = Harness::new(MockHandler::echo().with_priority("echo", 4));
    let mut header = Header::new(ProtocolId::Compact);
    header.set(PRIORITY_HEADER, "1");
    let req = h.request_with(header, "echo", MessageType::Call, 1);
    h.processor.process(req).expect("accepted");
    h.drain();

    assert_eq!(h.handler.priority_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.transport.count(), 1);
}

#[test]
fn raising_priority_rule_still_dispatches() {
    let mut h = Harness::new(MockHandler::echo().raising_priority());
    let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, 1);
    h.processor.process(req).expect("accepted");
    h.drain();

    assert_eq!(h.handler.priority_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.handler.dispatch_count(), 1);
    assert_eq!(h.transport.count(), 1);
}

#[test]
fn priority_queue_serves_highest_band_first() {
    let config = DispatcherConfig {
        kind: DispatcherKind::PriorityQueue {
            workers: 1,
            max_pending: 0,
        },
        ..DispatcherConfig::default()
    };
    let mut h = Harness::with_config(
        MockHandler::echo()
            .with_priority("bulk", 4)
            .with_priority("health", 0)
            .with_priority("query", 2),
        config,
        true,
    );
    let gate = block_worker(&h);

    for (seq, name) in (1..).zip(["bulk", "query", "health"]) {
        let req = h.request(ProtocolId::Compact, name, MessageType::Call, seq);
        h.processor.process(req).expect("accepted");
    }
    gate.send(()).expect("release worker");
    h.drain();

    let order: Vec<String> = h
        .handler
        .dispatched
        .lock()
        .iter()
        .map(|c| envelope::method_name(&c.input, ProtocolId::Compact as i16))
        .collect();
    assert_eq!(order, ["health", "query", "bulk"]);
}

// ── Rejection, expiry, shutdown ──────────────────────────────

#[test]
fn rejected_request_gets_loadshedding_error() {
    let mut h = Harness::new(MockHandler::echo());
    h.processor.dispatcher().stop();

    let req = h.request(ProtocolId::Binary, "echo", MessageType::Call, 21);
    let status = req.status();
    assert_eq!(h.processor.process(req), Err(DispatchError::ShutDown));
    h.flush();

    let frames = h.transport.frames();
    assert_eq!(frames.len(), 1);
    let begin = parse_message_begin(&frames[0], ProtocolId::Binary).expect("exception frame");
    assert_eq!(begin.kind, MessageType::Exception);
    assert_eq!(begin.seq_id, 21);
    assert!(contains(&frames[0], b"dispatcher shut down"));
    assert_eq!(status.get(), RequestState::Errored);
    assert_eq!(h.observer.overloaded.load(Ordering::SeqCst), 1);
    assert_eq!(h.handler.dispatch_count(), 0);
}

#[test]
fn rejected_oneway_is_dropped_silently() {
    let mut h = Harness::new(MockHandler::echo().with_oneway(&["ping"]));
    h.processor.dispatcher().stop();

    let req = h.request(ProtocolId::Binary, "ping", MessageType::Oneway, 22);
    let status = req.status();
    assert!(h.processor.process(req).is_err());
    h.flush();

    assert_eq!(h.transport.count(), 0);
    assert_eq!(status.get(), RequestState::Dropped);
}

#[test]
fn full_queue_rejects_with_loadshedding() {
    let config = DispatcherConfig {
        kind: DispatcherKind::Simple {
            workers: 1,
            max_pending: 1,
        },
        ..DispatcherConfig::default()
    };
    let mut h = Harness::with_config(MockHandler::echo(), config, true);
    let gate = block_worker(&h);

    let first = h.request(ProtocolId::Compact, "echo", MessageType::Call, 1);
    h.processor.process(first).expect("fits");
    let second = h.request(ProtocolId::Compact, "echo", MessageType::Call, 2);
    assert_eq!(h.processor.process(second), Err(DispatchError::QueueFull));

    gate.send(()).expect("release worker");
    h.drain();

    let frames = h.transport.frames();
    assert_eq!(frames.len(), 2);
    let shed = frames
        .iter()
        .filter(|f| contains(f, b"task queue full"))
        .count();
    assert_eq!(shed, 1);
}

#[test]
fn expired_request_is_dropped_and_reported() {
    let config = DispatcherConfig {
        task_expire_ms: 20,
        ..single_worker()
    };
    let mut h = Harness::with_config(MockHandler::echo(), config, true);
    let gate = block_worker(&h);

    let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, 1);
    let status = req.status();
    h.processor.process(req).expect("accepted");
    std::thread::sleep(Duration::from_millis(60));
    gate.send(()).expect("release worker");
    h.drain();

    assert_eq!(h.handler.dispatch_count(), 0);
    assert_eq!(h.transport.count(), 0);
    assert_eq!(status.get(), RequestState::Dropped);
    assert_eq!(h.observer.expired.load(Ordering::SeqCst), 1);
    assert_eq!(h.processor.dispatcher().expired_task_count(), 1);
}

#[test]
fn shutdown_with_drain_answers_everything_queued() {
    let mut h = Harness::new(MockHandler::echo());
    let gate = block_worker(&h);
    for seq in 1..=5 {
        let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, seq);
        h.processor.process(req).expect("accepted");
    }
    gate.send(()).expect("release worker");
    h.drain();

    assert_eq!(h.handler.dispatch_count(), 5);
    assert_eq!(h.transport.count(), 5);
}

#[test]
fn shutdown_without_drain_drops_queued_requests() {
    let mut h = Harness::new(MockHandler::echo());
    let gate = block_worker(&h);
    let statuses: Vec<_> = (1..=3)
        .map(|seq| {
            let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, seq);
            let status = req.status();
            h.processor.process(req).expect("accepted");
            status
        })
        .collect();

    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        let _ = gate.send(());
    });
    h.processor.shutdown(false);
    releaser.join().expect("releaser");
    h.flush();

    assert_eq!(h.handler.dispatch_count(), 0);
    assert_eq!(h.transport.count(), 0);
    assert!(statuses.iter().all(|s| s.get() == RequestState::Dropped));
}

// ── Observer ─────────────────────────────────────────────────

#[test]
fn observer_sees_full_lifecycle_under_lock() {
    let mut h = Harness::new(MockHandler::echo());
    let req = h.request(ProtocolId::Compact, "echo", MessageType::Call, 1);
    h.processor.process(req).expect("accepted");
    h.drain();

    let o = &h.observer;
    assert_eq!(o.received.load(Ordering::SeqCst), 1);
    assert_eq!(o.queued.load(Ordering::SeqCst), 1);
    assert_eq!(o.sent.load(Ordering::SeqCst), 1);
    assert!(o.lock_always_held.load(Ordering::SeqCst));

    let completed = o.completed.lock();
    assert_eq!(completed.len(), 1);
    let ts = completed[0];
    let begin = ts.process_begin.expect("begin stamped");
    let end = ts.process_end.expect("end stamped");
    assert!(ts.received <= begin && begin <= end);
}

#[test]
fn every_request_ends_in_exactly_one_terminal_state() {
    let mut h = Harness::new(MockHandler::echo().with_oneway(&["ping"]));
    let mut statuses = Vec::new();
    for seq in 1..=20 {
        let (name, kind) = if seq % 3 == 0 {
            ("ping", MessageType::Oneway)
        } else {
            ("echo", MessageType::Call)
        };
        let req = h.request(ProtocolId::Compact, name, kind, seq);
        statuses.push(req.status());
        h.processor.process(req).expect("accepted");
    }
    h.drain();

    assert!(statuses.iter().all(|s| s.get().is_terminal()));
    // 14 two-way echoes reply; oneway pings stay silent.
    assert_eq!(h.transport.count(), 14);
}
