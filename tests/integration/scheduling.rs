use crate::integration::support::{agent, start, stop, wait_until};
use llmux::error::LlmuxError;
use llmux::handler::{work_fn, Handler};
use llmux::severity::Severity;
use llmux::system::System;
use llmux::types::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn wakes_during_a_run_coalesce_into_one_more_run() {
    let system = System::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());
    let work = {
        let runs = Arc::clone(&runs);
        let release = Arc::clone(&release);
        work_fn(move |_ctx| {
            let runs = Arc::clone(&runs);
            let release = Arc::clone(&release);
            async move {
                if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                    release.notified().await;
                }
                Ok(())
            }
        })
    };
    let worker = agent("worker", vec![Handler::new("work", Severity::Warning, work)]);
    system.add_peer(Arc::clone(&worker));
    let running = start(&system);

    worker.receive_message(&Sender::System, "first", Severity::Warning);
    wait_until(|| runs.load(Ordering::SeqCst) == 1).await;
    for n in 0..3 {
        worker.receive_message(&Sender::System, &format!("more {}", n), Severity::Error);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    release.notify_one();
    wait_until(|| runs.load(Ordering::SeqCst) == 2).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    let stats = stop(&system, running).await;
    assert_eq!(stats.dispatched, 2);
    assert_eq!(stats.completed, 2);
}

#[tokio::test(start_paused = true)]
async fn messages_below_threshold_do_not_dispatch() {
    let system = System::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let work = {
        let runs = Arc::clone(&runs);
        work_fn(move |_ctx| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };
    let worker = agent("worker", vec![Handler::new("work", Severity::Warning, work)]);
    system.add_peer(Arc::clone(&worker));
    let running = start(&system);

    worker.receive_message(&Sender::System, "fyi", Severity::Info);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(worker.mailbox().last().unwrap().message.content, "fyi");

    stop(&system, running).await;
}

#[tokio::test(start_paused = true)]
async fn always_handler_is_redispatched_up_to_its_cap() {
    let system = System::default();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let work = {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        work_fn(move |_ctx| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };
    let looping = Handler::always("loop", work).with_max_tasks(2);
    system.add_peer(agent("looper", vec![looping]));
    let running = start(&system);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let stats = stop(&system, running).await;

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert!(stats.dispatched >= 10, "dispatched {}", stats.dispatched);
}

#[tokio::test(start_paused = true)]
async fn sleeping_handler_runs_when_the_deadline_passes() {
    let system = System::default();
    let started_at = Arc::new(Mutex::new(Vec::new()));
    let work = {
        let started_at = Arc::clone(&started_at);
        work_fn(move |_ctx| {
            let started_at = Arc::clone(&started_at);
            async move {
                started_at.lock().push(Instant::now());
                Ok(())
            }
        })
    };
    let sleeper = agent("sleeper", vec![Handler::new("work", Severity::Warning, work)]);
    system.add_peer(Arc::clone(&sleeper));

    let began = Instant::now();
    let reply = sleeper.sleep(Duration::from_secs(10)).unwrap();
    assert!(reply.starts_with("sleeper sleeps until "));
    assert_eq!(sleeper.threshold(), Severity::Info);
    let running = start(&system);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(started_at.lock().is_empty());

    tokio::time::sleep(Duration::from_secs(6)).await;
    let runs = started_at.lock().clone();
    assert_eq!(runs.len(), 1);
    assert!(runs[0] - began >= Duration::from_secs(10));
    // the raised threshold outlives the sleep
    assert_eq!(sleeper.threshold(), Severity::Info);

    stop(&system, running).await;
}

#[tokio::test(start_paused = true)]
async fn admitted_message_interrupts_sleep() {
    let system = System::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let work = {
        let runs = Arc::clone(&runs);
        work_fn(move |_ctx| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };
    let sleeper = agent("sleeper", vec![Handler::new("work", Severity::Trivial, work)]);
    system.add_peer(Arc::clone(&sleeper));
    sleeper.sleep(Duration::from_secs(60)).unwrap();
    let running = start(&system);

    tokio::time::sleep(Duration::from_secs(1)).await;
    sleeper.receive_message(&Sender::System, "small talk", Severity::Trivial);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let woken_at = Instant::now();
    sleeper.receive_message(&Sender::System, "build broke", Severity::Warning);
    wait_until(|| runs.load(Ordering::SeqCst) == 1).await;
    assert!(woken_at.elapsed() < Duration::from_secs(1));

    stop(&system, running).await;
}

#[tokio::test(start_paused = true)]
async fn removing_a_peer_cancels_its_tasks() {
    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let system = System::default();
    let started = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let work = {
        let started = Arc::clone(&started);
        let dropped = Arc::clone(&dropped);
        work_fn(move |_ctx| {
            let started = Arc::clone(&started);
            let guard = SetOnDrop(Arc::clone(&dropped));
            async move {
                let _guard = guard;
                started.store(true, Ordering::SeqCst);
                std::future::pending::<()>().await;
                Ok(())
            }
        })
    };
    let stuck = agent("stuck", vec![Handler::new("work", Severity::Warning, work)]);
    system.add_peer(Arc::clone(&stuck));
    let running = start(&system);

    stuck.receive_message(&Sender::System, "go", Severity::Warning);
    wait_until(|| started.load(Ordering::SeqCst)).await;
    assert_eq!(stuck.in_flight(), 1);

    assert_eq!(system.remove_peer("stuck"), "Removed peer named stuck");
    wait_until(|| dropped.load(Ordering::SeqCst)).await;
    assert!(system.peer("stuck").is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = stop(&system, running).await;
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.completed, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_and_panicking_tasks_do_not_stop_the_loop() {
    let system = System::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let work = {
        let runs = Arc::clone(&runs);
        work_fn(move |_ctx| {
            let runs = Arc::clone(&runs);
            async move {
                match runs.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(LlmuxError::DeviceError("disk full".to_string())),
                    1 => panic!("handler bug"),
                    _ => Ok(()),
                }
            }
        })
    };
    let worker = agent("worker", vec![Handler::new("work", Severity::Warning, work)]);
    system.add_peer(Arc::clone(&worker));
    let running = start(&system);

    for expected in 1..=3 {
        worker.receive_message(&Sender::System, "again", Severity::Warning);
        wait_until(|| runs.load(Ordering::SeqCst) == expected).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let stats = stop(&system, running).await;
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.completed, 1);
}
