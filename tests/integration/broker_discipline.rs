use async_trait::async_trait;
use futures::future::join_all;
use llmux::broker::{Backend, BackendInfo, Discipline, Transport};
use llmux::error::TransportError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Takes `latency` per call and records when each call started.
struct Timed {
    latency: Duration,
    starts: Mutex<Vec<Instant>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Transport for Timed {
    type Payload = usize;
    type Output = usize;

    async fn call(&self, payload: usize) -> Result<usize, TransportError> {
        self.starts.lock().push(Instant::now());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(payload)
    }
}

fn timed(discipline: Discipline, min_interval: Duration, latency: Duration) -> Arc<Backend<Timed>> {
    Arc::new(
        Backend::new(
            "timed",
            "fixed latency",
            Timed {
                latency,
                starts: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            },
        )
        .with_min_interval(min_interval)
        .with_discipline(discipline),
    )
}

async fn dispatch_concurrently(backend: &Arc<Backend<Timed>>, count: usize) -> Vec<usize> {
    join_all((0..count).map(|n| {
        let backend = Arc::clone(backend);
        async move { backend.dispatch(&format!("caller-{}", n), n).await }
    }))
    .await
}

fn gaps(starts: &[Instant]) -> Vec<Duration> {
    starts.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

#[tokio::test(start_paused = true)]
async fn exclusive_backend_spaces_calls_and_runs_one_at_a_time() {
    let backend = timed(
        Discipline::Exclusive,
        Duration::from_millis(100),
        Duration::from_millis(10),
    );

    let outputs = dispatch_concurrently(&backend, 4).await;

    assert_eq!(outputs, vec![0, 1, 2, 3]);
    let transport = backend.transport();
    let starts = transport.starts.lock().clone();
    assert_eq!(starts.len(), 4);
    for gap in gaps(&starts) {
        assert!(gap >= Duration::from_millis(100), "gap {:?}", gap);
    }
    assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
    assert_eq!(backend.stats().completed, 4);
}

#[tokio::test(start_paused = true)]
async fn exclusive_backend_waits_for_slow_calls() {
    let backend = timed(
        Discipline::Exclusive,
        Duration::from_millis(100),
        Duration::from_millis(300),
    );

    dispatch_concurrently(&backend, 3).await;

    let starts = backend.transport().starts.lock().clone();
    for gap in gaps(&starts) {
        assert!(gap >= Duration::from_millis(300), "gap {:?}", gap);
    }
}

#[tokio::test(start_paused = true)]
async fn ticketed_backend_overlaps_calls_but_keeps_spacing() {
    let backend = timed(
        Discipline::Ticketed,
        Duration::from_millis(100),
        Duration::from_millis(300),
    );

    let began = Instant::now();
    dispatch_concurrently(&backend, 3).await;

    let transport = backend.transport();
    let starts = transport.starts.lock().clone();
    assert_eq!(starts.len(), 3);
    for gap in gaps(&starts) {
        assert!(gap >= Duration::from_millis(100), "gap {:?}", gap);
    }
    assert!(transport.peak.load(Ordering::SeqCst) >= 2);
    // three serial calls would need at least 900ms
    assert!(began.elapsed() < Duration::from_millis(900));
    let stats = backend.stats();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.in_service, 0);
}
