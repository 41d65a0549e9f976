use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use super::*;
use crate::adapter::dry_run::DryRunAdapter;
use crate::events::Progress;

const DEVICE: &str = "AA:BB:CC:DD:EE:FF";

fn bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

fn small_chunks() -> AdapterOptions {
    AdapterOptions::new().with_chunk_size(4)
}

async fn connected(adapter: DryRunAdapter) -> (Arc<DryRunAdapter>, Arc<Printer>) {
    let adapter = Arc::new(adapter);
    let printer = Arc::new(Printer::new(adapter.clone()));
    printer.connect(DEVICE).await.unwrap();
    printer.set_options(small_chunks());
    (adapter, printer)
}

async fn wait_for_state(rx: &mut broadcast::Receiver<PrinterState>, target: PrinterState) {
    loop {
        if rx.recv().await.unwrap() == target {
            return;
        }
    }
}

async fn wait_for_sent(rx: &mut broadcast::Receiver<Progress>, sent: usize) {
    loop {
        if rx.recv().await.unwrap().sent >= sent {
            return;
        }
    }
}

fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(v) = rx.try_recv() {
        out.push(v);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn print_before_connect_is_rejected() {
    let printer = Printer::new(Arc::new(DryRunAdapter::new()));
    let mut errors = printer.events().subscribe_error();

    let err = printer.print().await.unwrap_err();
    assert!(matches!(err, PrinterError::NotConnected));
    assert!(matches!(errors.try_recv(), Ok(PrinterError::NotConnected)));
    assert_eq!(printer.state(), PrinterState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn queue_before_connect_is_rejected() {
    let printer = Printer::new(Arc::new(DryRunAdapter::new()));

    assert!(matches!(printer.text("hi"), Err(PrinterError::NotConnected)));
    assert!(matches!(printer.feed(1), Err(PrinterError::NotConnected)));
    assert!(matches!(printer.cut(), Err(PrinterError::NotConnected)));
    assert!(matches!(
        printer.image(&[0; 4], 1, 1),
        Err(PrinterError::NotConnected)
    ));
    assert_eq!(printer.pending_fragments(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_failure_is_reported() {
    let adapter = Arc::new(DryRunAdapter::new().refusing_connect());
    let printer = Printer::new(adapter);
    let mut errors = printer.events().subscribe_error();

    let err = printer.connect(DEVICE).await.unwrap_err();
    assert!(matches!(err, PrinterError::ConnectionFailed(_)));
    assert!(matches!(
        errors.try_recv(),
        Ok(PrinterError::ConnectionFailed(_))
    ));
    assert!(!printer.is_connected());
}

#[tokio::test(start_paused = true)]
async fn print_delivers_queued_operations_in_order() {
    let adapter = Arc::new(DryRunAdapter::new());
    let printer = Printer::new(adapter.clone());
    let mut states = printer.events().subscribe_state_change();
    let mut connected = printer.events().subscribe_connected();
    let mut complete = printer.events().subscribe_print_complete();

    printer.connect(DEVICE).await.unwrap();
    printer
        .init()
        .unwrap()
        .text("Hello")
        .unwrap()
        .feed(2)
        .unwrap()
        .cut()
        .unwrap();
    assert_eq!(printer.pending_fragments(), 4);

    let outcome = printer.print().await.unwrap();

    let expected = [
        vec![0x1b, 0x40],
        b"Hello\n".to_vec(),
        vec![0x1b, 0x64, 2],
        vec![0x1d, 0x56, 0x42, 0],
    ]
    .concat();
    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(adapter.written_bytes(), expected);
    assert_eq!(adapter.write_calls(), expected.len().div_ceil(20));
    assert_eq!(printer.remaining(), 0);
    assert_eq!(printer.pending_fragments(), 0);
    assert_eq!(printer.job_state(), JobState::NoJob);
    assert_eq!(
        drain(&mut states),
        vec![
            PrinterState::Connected,
            PrinterState::Printing,
            PrinterState::Connected
        ]
    );
    assert_eq!(connected.try_recv().unwrap(), DEVICE);
    assert!(complete.try_recv().is_ok());
}

#[tokio::test(start_paused = true)]
async fn empty_print_completes_without_writes() {
    let (adapter, printer) = connected(DryRunAdapter::new()).await;
    let mut complete = printer.events().subscribe_print_complete();

    assert_eq!(printer.print().await.unwrap(), JobOutcome::Completed);
    assert_eq!(adapter.write_calls(), 0);
    assert!(complete.try_recv().is_ok());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_per_chunk() {
    // Every even-numbered write fails: each chunk fails once, then succeeds.
    let (adapter, printer) =
        connected(DryRunAdapter::new().with_failure_policy(|i, _| i % 2 == 0)).await;
    printer.set_options(small_chunks().with_retries(1));
    let mut progress = printer.events().subscribe_progress();

    printer.raw(bytes(10)).unwrap();
    assert_eq!(printer.print().await.unwrap(), JobOutcome::Completed);

    assert_eq!(adapter.write_calls(), 6);
    let sent: Vec<_> = drain(&mut progress).iter().map(|p| p.sent).collect();
    assert_eq!(sent, vec![4, 8, 10]);
    assert_eq!(adapter.written_bytes(), bytes(10));
}

#[tokio::test(start_paused = true)]
async fn progress_subscriber_does_not_change_delivery() {
    let (with_sub, printer_a) = connected(DryRunAdapter::new()).await;
    let _progress = printer_a.events().subscribe_progress();
    printer_a.raw(bytes(30)).unwrap();
    printer_a.print().await.unwrap();

    let (without_sub, printer_b) = connected(DryRunAdapter::new()).await;
    printer_b.raw(bytes(30)).unwrap();
    printer_b.print().await.unwrap();

    assert_eq!(with_sub.written_chunks(), without_sub.written_chunks());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_job_and_release_it() {
    let (adapter, printer) =
        connected(DryRunAdapter::new().with_failure_policy(|_, _| true)).await;
    printer.set_options(small_chunks().with_retries(2));
    let mut errors = printer.events().subscribe_error();
    let mut states = printer.events().subscribe_state_change();

    printer.raw(bytes(10)).unwrap();
    let err = printer.print().await.unwrap_err();

    assert!(matches!(
        err,
        PrinterError::WriteFailed {
            chunk: 1,
            chunks: 3,
            ..
        }
    ));
    assert_eq!(adapter.write_calls(), 3);
    assert!(matches!(
        errors.try_recv(),
        Ok(PrinterError::WriteFailed { chunk: 1, .. })
    ));
    assert_eq!(
        drain(&mut states),
        vec![PrinterState::Printing, PrinterState::Connected]
    );
    assert_eq!(printer.remaining(), 0);
    assert_eq!(printer.job_state(), JobState::NoJob);

    // The printer accepts a new job right away.
    printer.raw(bytes(2)).unwrap();
    assert!(matches!(
        printer.print().await,
        Err(PrinterError::WriteFailed { chunks: 1, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn second_print_while_live_is_rejected() {
    let (_adapter, printer) =
        connected(DryRunAdapter::new().with_latency(Duration::from_millis(50))).await;
    let mut states = printer.events().subscribe_state_change();

    printer.raw(bytes(8)).unwrap();
    let running = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_state(&mut states, PrinterState::Printing).await;

    printer.raw(bytes(3)).unwrap();
    let err = printer.print().await.unwrap_err();
    assert!(matches!(err, PrinterError::PrintJobAlreadyInProgress));
    assert_eq!(printer.pending_fragments(), 1);

    assert_eq!(running.await.unwrap().unwrap(), JobOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn pause_then_resume_continues_from_offset() {
    let (adapter, printer) = connected(DryRunAdapter::new()).await;
    let mut progress = printer.events().subscribe_progress();
    let data = bytes(20);

    printer.raw(data.clone()).unwrap();
    let running = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });

    wait_for_sent(&mut progress, 8).await;
    printer.pause();
    assert_eq!(printer.state(), PrinterState::Paused);

    assert_eq!(running.await.unwrap().unwrap(), JobOutcome::Paused);
    assert_eq!(adapter.write_calls(), 2);
    assert_eq!(printer.remaining(), 12);
    assert_eq!(printer.job_state(), JobState::Paused);

    assert_eq!(printer.resume().await.unwrap(), Some(JobOutcome::Completed));
    assert_eq!(adapter.write_calls(), 5);
    assert_eq!(adapter.written_bytes(), data);
    assert_eq!(printer.remaining(), 0);
    assert_eq!(printer.state(), PrinterState::Connected);
}

#[tokio::test(start_paused = true)]
async fn pause_lets_in_flight_chunk_finish() {
    let (adapter, printer) =
        connected(DryRunAdapter::new().with_latency(Duration::from_millis(50))).await;
    let mut states = printer.events().subscribe_state_change();

    printer.raw(bytes(12)).unwrap();
    let running = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_state(&mut states, PrinterState::Printing).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    printer.pause();
    assert_eq!(printer.remaining(), 12);

    assert_eq!(running.await.unwrap().unwrap(), JobOutcome::Paused);
    assert_eq!(adapter.written_chunks(), vec![bytes(4)]);
    assert_eq!(printer.remaining(), 8);
}

#[tokio::test(start_paused = true)]
async fn resume_before_checkpoint_reuses_running_transmission() {
    let (adapter, printer) =
        connected(DryRunAdapter::new().with_latency(Duration::from_millis(50))).await;
    let mut states = printer.events().subscribe_state_change();
    let data = bytes(12);

    printer.raw(data.clone()).unwrap();
    let running = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_state(&mut states, PrinterState::Printing).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    printer.pause();
    assert_eq!(
        printer.resume().await.unwrap(),
        Some(JobOutcome::Continuing)
    );

    assert_eq!(running.await.unwrap().unwrap(), JobOutcome::Completed);
    assert_eq!(adapter.write_calls(), 3);
    assert_eq!(adapter.written_bytes(), data);
}

#[tokio::test(start_paused = true)]
async fn resume_failure_leaves_printer_idle() {
    let (adapter, printer) = connected(DryRunAdapter::new()).await;
    let mut progress = printer.events().subscribe_progress();

    printer.raw(bytes(12)).unwrap();
    let running = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_sent(&mut progress, 4).await;
    printer.pause();
    assert_eq!(running.await.unwrap().unwrap(), JobOutcome::Paused);

    adapter.fail_next(4);
    let err = printer.resume().await.unwrap_err();
    assert!(matches!(
        err,
        PrinterError::WriteFailed {
            chunk: 2,
            chunks: 3,
            ..
        }
    ));
    assert_eq!(printer.state(), PrinterState::Connected);
    assert_eq!(printer.remaining(), 0);
    assert_eq!(printer.resume().await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn cancel_discards_job_and_ignores_in_flight_write() {
    let (adapter, printer) =
        connected(DryRunAdapter::new().with_latency(Duration::from_millis(50))).await;
    let mut states = printer.events().subscribe_state_change();
    let mut progress = printer.events().subscribe_progress();

    printer.raw(bytes(12)).unwrap();
    let running = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_state(&mut states, PrinterState::Printing).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    printer.cancel();
    assert_eq!(printer.remaining(), 0);
    assert_eq!(printer.job_state(), JobState::NoJob);
    assert_eq!(printer.state(), PrinterState::Connected);

    assert_eq!(running.await.unwrap().unwrap(), JobOutcome::Cancelled);
    // The in-flight write settled but nothing after it was attempted.
    assert_eq!(adapter.write_calls(), 1);
    assert!(drain(&mut progress).is_empty());

    let fresh = vec![0xaa, 0xbb, 0xcc];
    printer.raw(fresh.clone()).unwrap();
    assert_eq!(printer.print().await.unwrap(), JobOutcome::Completed);
    let chunks = adapter.written_chunks();
    assert_eq!(chunks.last(), Some(&fresh));
    assert_eq!(chunks.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stale_transmission_never_touches_next_job() {
    let (adapter, printer) =
        connected(DryRunAdapter::new().with_latency(Duration::from_millis(50))).await;
    let mut states = printer.events().subscribe_state_change();

    printer.raw(vec![1u8; 8]).unwrap();
    let first = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_state(&mut states, PrinterState::Printing).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    printer.cancel();

    printer.raw(vec![2u8; 8]).unwrap();
    let second = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });

    assert_eq!(first.await.unwrap().unwrap(), JobOutcome::Cancelled);
    assert_eq!(second.await.unwrap().unwrap(), JobOutcome::Completed);
    assert_eq!(
        adapter.written_chunks(),
        vec![vec![1u8; 4], vec![2u8; 4], vec![2u8; 4]]
    );
    assert_eq!(printer.remaining(), 0);
}

#[tokio::test(start_paused = true)]
async fn no_op_calls_emit_nothing() {
    let (_adapter, printer) = connected(DryRunAdapter::new()).await;
    let mut states = printer.events().subscribe_state_change();

    printer.pause();
    printer.cancel();
    assert_eq!(printer.resume().await.unwrap(), None);

    assert!(drain(&mut states).is_empty());
    assert_eq!(printer.state(), PrinterState::Connected);
    assert_eq!(printer.job_state(), JobState::NoJob);
}

#[tokio::test(start_paused = true)]
async fn repeated_pause_emits_once() {
    let (_adapter, printer) = connected(DryRunAdapter::new()).await;
    let mut progress = printer.events().subscribe_progress();
    let mut states = printer.events().subscribe_state_change();

    printer.raw(bytes(12)).unwrap();
    let running = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_sent(&mut progress, 4).await;
    printer.pause();
    printer.pause();
    assert_eq!(running.await.unwrap().unwrap(), JobOutcome::Paused);

    assert_eq!(
        drain(&mut states),
        vec![PrinterState::Printing, PrinterState::Paused]
    );
}

#[tokio::test(start_paused = true)]
async fn adapter_disconnect_aborts_running_job() {
    let (adapter, printer) =
        connected(DryRunAdapter::new().with_latency(Duration::from_millis(50))).await;
    let mut states = printer.events().subscribe_state_change();
    let mut errors = printer.events().subscribe_error();
    let mut disconnected = printer.events().subscribe_disconnected();

    printer.raw(bytes(12)).unwrap();
    let running = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_state(&mut states, PrinterState::Printing).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    adapter.simulate_disconnect(DEVICE);
    assert_eq!(printer.remaining(), 0);
    assert_eq!(printer.state(), PrinterState::Disconnected);

    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(err, PrinterError::DeviceDisconnectedDuringJob));
    assert_eq!(
        drain(&mut errors)
            .iter()
            .filter(|e| matches!(e, PrinterError::DeviceDisconnectedDuringJob))
            .count(),
        1
    );
    assert_eq!(disconnected.try_recv().unwrap(), DEVICE);
    assert!(matches!(printer.print().await, Err(PrinterError::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn overlapping_disconnects_fail_both_jobs() {
    let (adapter, printer) =
        connected(DryRunAdapter::new().with_latency(Duration::from_millis(50))).await;
    let mut states = printer.events().subscribe_state_change();

    printer.raw(bytes(8)).unwrap();
    let first = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_state(&mut states, PrinterState::Printing).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    adapter.simulate_disconnect(DEVICE);

    // Job 1's write is still in flight when job 2 starts.
    printer.connect(DEVICE).await.unwrap();
    printer.raw(bytes(8)).unwrap();
    let second = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_state(&mut states, PrinterState::Printing).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    adapter.simulate_disconnect(DEVICE);

    assert!(matches!(
        first.await.unwrap(),
        Err(PrinterError::DeviceDisconnectedDuringJob)
    ));
    assert!(matches!(
        second.await.unwrap(),
        Err(PrinterError::DeviceDisconnectedDuringJob)
    ));
    assert!(printer.shared.inner.lock().aborted.is_empty());
}

#[tokio::test(start_paused = true)]
async fn adapter_disconnect_drops_paused_job() {
    let (adapter, printer) = connected(DryRunAdapter::new()).await;
    let mut progress = printer.events().subscribe_progress();
    let mut errors = printer.events().subscribe_error();

    printer.raw(bytes(12)).unwrap();
    let running = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_sent(&mut progress, 4).await;
    printer.pause();
    assert_eq!(running.await.unwrap().unwrap(), JobOutcome::Paused);

    adapter.simulate_disconnect(DEVICE);

    let errs = drain(&mut errors);
    assert_eq!(errs.len(), 1);
    assert!(matches!(errs[0], PrinterError::DeviceDisconnectedDuringJob));
    assert_eq!(printer.remaining(), 0);
    assert_eq!(printer.job_state(), JobState::NoJob);
    assert_eq!(printer.resume().await.unwrap(), None);
    assert!(printer.shared.inner.lock().aborted.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_stops_retries() {
    let (adapter, printer) =
        connected(DryRunAdapter::new().with_failure_policy(|_, _| true)).await;
    printer.set_options(
        AdapterOptions::new()
            .with_chunk_size(4)
            .with_delay_ms(100)
            .with_retries(5),
    );

    printer.raw(bytes(8)).unwrap();
    let running = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    // First attempt fails at once; the retry waits 200ms.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(adapter.write_calls(), 1);
    printer.cancel();

    assert_eq!(running.await.unwrap().unwrap(), JobOutcome::Cancelled);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(adapter.write_calls(), 1);
    assert_eq!(printer.state(), PrinterState::Connected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_best_effort() {
    let (_adapter, printer) = connected(DryRunAdapter::new().refusing_disconnect()).await;
    let mut errors = printer.events().subscribe_error();
    let mut states = printer.events().subscribe_state_change();

    printer.disconnect().await.unwrap();

    assert!(!printer.is_connected());
    assert_eq!(drain(&mut states), vec![PrinterState::Disconnected]);
    assert!(matches!(
        errors.try_recv(),
        Ok(PrinterError::DisconnectFailed(_))
    ));
    // Second disconnect is a no-op.
    printer.disconnect().await.unwrap();
    assert!(drain(&mut states).is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_drops_paused_job() {
    let (_adapter, printer) = connected(DryRunAdapter::new()).await;
    let mut progress = printer.events().subscribe_progress();

    printer.raw(bytes(12)).unwrap();
    let running = tokio::spawn({
        let printer = printer.clone();
        async move { printer.print().await }
    });
    wait_for_sent(&mut progress, 4).await;
    printer.pause();
    assert_eq!(running.await.unwrap().unwrap(), JobOutcome::Paused);

    printer.disconnect().await.unwrap();
    assert_eq!(printer.remaining(), 0);
    assert_eq!(printer.job_state(), JobState::NoJob);
    assert_eq!(printer.resume().await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn per_job_options_override_printer_options() {
    let (adapter, printer) = connected(DryRunAdapter::new()).await;

    printer.raw(bytes(10)).unwrap();
    printer
        .print_with_options(AdapterOptions::new().with_chunk_size(5))
        .await
        .unwrap();

    assert_eq!(adapter.write_calls(), 2);
    assert_eq!(printer.options().chunk_size, 4);
}

#[tokio::test(start_paused = true)]
async fn invalid_image_is_reported_as_driver_error() {
    let (_adapter, printer) = connected(DryRunAdapter::new()).await;
    let mut errors = printer.events().subscribe_error();

    let err = printer.image(&[0u8; 7], 2, 2).unwrap_err();
    assert!(matches!(err, PrinterError::Driver(_)));
    assert!(matches!(errors.try_recv(), Ok(PrinterError::Driver(_))));
    assert_eq!(printer.pending_fragments(), 0);
}

#[tokio::test(start_paused = true)]
async fn text_uses_configured_encoding() {
    let (adapter, printer) = connected(DryRunAdapter::new()).await;
    printer.set_encoding(TextEncoding::Gbk);

    printer.text("中").unwrap();
    printer.print().await.unwrap();

    assert_eq!(
        adapter.written_bytes(),
        vec![0x1c, 0x26, 0xd6, 0xd0, 0x1c, 0x2e, 0x0a]
    );
}
