#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::error::WorkError;
    use crate::flow::{Flow, SubscriptionHandle};
    use crate::io::base::BaseRx;
    use crate::scheduler::{VirtualScheduler, WorkerPool};
    use crate::signal::{Demand, Signal, SignalKind};
    use crate::testkit::{FlowVerifier, Recorder, VerifyError};
    use crate::utils::CancelToken;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn label(sig: Signal<u32>) -> String {
        match sig.kind {
            SignalKind::Subscribed => "sub".to_string(),
            SignalKind::Next(v) => format!("next:{v}"),
            SignalKind::Completed => "done".to_string(),
            SignalKind::Errored(_) => "err".to_string(),
        }
    }

    fn trace_subscriber(log: &Arc<Mutex<Vec<String>>>) -> impl FnMut(Signal<u32>) + Send + 'static {
        let log = log.clone();
        move |sig: Signal<u32>| log.lock().push(label(sig))
    }

    // ---- helper: run a flow on the global pool and record until terminal
    fn collect_real(flow: &Flow<u32>) -> Vec<String> {
        let (rec, mut rx) = Recorder::channel();
        let handle = flow.subscribe(rec, WorkerPool::global());
        handle.request(Demand::Unbounded);

        let cancel = CancelToken::root();
        let mut out = Vec::new();
        loop {
            match rx.recv(&cancel, Some(Duration::from_secs(2))) {
                Ok(sig) => {
                    let terminal = sig.kind.is_terminal();
                    out.push(label(sig));
                    if terminal {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        out
    }

    #[test]
    fn emit_delivers_in_order_then_completes() {
        let clock = Arc::new(VirtualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = Flow::emit([1u32, 2, 3]).subscribe(trace_subscriber(&log), clock.clone());
        // Subscribed lands before any request.
        assert_eq!(*log.lock(), vec!["sub"]);

        handle.request(Demand::Unbounded);
        assert_eq!(*log.lock(), vec!["sub", "next:1", "next:2", "next:3", "done"]);
        assert!(handle.is_terminated());
    }

    #[test]
    fn delay_first_holds_signals_for_logical_hours_in_microseconds() {
        let started = Instant::now();

        FlowVerifier::with_virtual_time(|_| {
            Flow::emit([7u32]).delay_first(Duration::from_secs(3600))
        })
        .expect_subscription()
        .expect_no_signal_for(Duration::from_secs(3600))
        .expect_next(|v| *v == 7)
        .expect_complete()
        .verify()
        .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn delay_first_waits_on_the_wall_clock() {
        let started = Instant::now();

        FlowVerifier::with_real_time(Flow::emit([1u32]).delay_first(Duration::from_millis(50)))
            .expect_subscription()
            .expect_no_signal_for(Duration::from_millis(20))
            .expect_next(|v| *v == 1)
            .expect_complete()
            .verify()
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn fan_out_preserves_the_value_multiset() {
        let clock = Arc::new(VirtualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = Flow::emit([1u32, 2, 3])
            .fan_out(|v| Ok(v * 10), None)
            .subscribe(trace_subscriber(&log), clock.clone());
        handle.request(Demand::Unbounded);
        clock.run_ready();

        let mut got = log.lock().clone();
        assert_eq!(got.remove(0), "sub");
        assert_eq!(got.pop().as_deref(), Some("done"));
        got.sort();
        assert_eq!(got, vec!["next:10", "next:20", "next:30"]);
    }

    #[test]
    fn fan_out_error_wins_once_and_silences_the_rest() {
        FlowVerifier::with_virtual_time(|_| {
            Flow::emit([1u32, 2, 3]).fan_out(
                |v| {
                    if v == 2 {
                        Err(WorkError::msg("boom"))
                    } else {
                        Ok(v)
                    }
                },
                None,
            )
        })
        .expect_subscription()
        .expect_next(|v| *v == 1)
        .expect_error_matches(|e| matches!(e, WorkError::Failed(m) if m == "boom"))
        .verify()
        .unwrap();
    }

    #[test]
    fn fan_out_with_limit_one_runs_elements_in_order() {
        let clock = Arc::new(VirtualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = Flow::emit([1u32, 2, 3])
            .fan_out(Ok, Some(1))
            .subscribe(trace_subscriber(&log), clock.clone());
        handle.request(Demand::Unbounded);
        clock.run_ready();

        assert_eq!(
            *log.lock(),
            vec!["sub", "next:1", "next:2", "next:3", "done"]
        );
    }

    #[test]
    fn fan_out_with_limit_zero_still_terminates() {
        FlowVerifier::with_virtual_time(|_| Flow::emit([1u32, 2]).fan_out(Ok, Some(0)))
            .expect_subscription()
            .expect_next_count(2)
            .expect_complete()
            .verify()
            .unwrap();
    }

    #[test]
    fn fan_out_default_reads_the_configured_limit() {
        let cfg = EngineConfig {
            fan_out_limit: Some(1),
            ..Default::default()
        };

        // Limit 1 serializes the stage, so source order survives.
        FlowVerifier::with_virtual_time(move |_| {
            Flow::emit([1u32, 2, 3]).fan_out_default(&cfg, Ok)
        })
        .expect_subscription()
        .expect_next(|v| *v == 1)
        .expect_next(|v| *v == 2)
        .expect_next(|v| *v == 3)
        .expect_complete()
        .verify()
        .unwrap();
    }

    #[test]
    fn then_runs_per_value_but_emits_nothing() {
        let clock = Arc::new(VirtualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let ran = Arc::new(AtomicUsize::new(0));

        let handle = {
            let ran = ran.clone();
            Flow::emit([1u32, 2, 3])
                .then(move |_| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .subscribe(trace_subscriber(&log), clock.clone())
        };
        handle.request(Demand::Unbounded);
        clock.run_ready();

        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert_eq!(*log.lock(), vec!["sub", "done"]);
    }

    #[test]
    fn then_return_sequences_work_with_re_emission() {
        let clock = Arc::new(VirtualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let work_log = log.clone();
            Flow::emit([1u32, 2])
                .then_return(move |v| {
                    work_log.lock().push(format!("work:{v}"));
                    Ok(())
                })
                .subscribe(trace_subscriber(&log), clock.clone())
        };
        handle.request(Demand::Unbounded);
        clock.run_ready();

        // One dependent work at a time, each finishing before its value
        // moves on.
        assert_eq!(
            *log.lock(),
            vec!["sub", "work:1", "next:1", "work:2", "next:2", "done"]
        );
    }

    #[test]
    fn then_error_stops_the_chain() {
        let ran = Arc::new(AtomicUsize::new(0));
        let seen = ran.clone();

        FlowVerifier::with_virtual_time(move |_| {
            Flow::emit([1u32, 2, 3]).then(move |v| {
                ran.fetch_add(1, Ordering::SeqCst);
                if *v == 2 {
                    Err(WorkError::msg("step failed"))
                } else {
                    Ok(())
                }
            })
        })
        .expect_subscription()
        .expect_error()
        .verify()
        .unwrap();

        // Value 3 never reaches the failed stage.
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn from_work_value_none_and_failure() {
        FlowVerifier::with_virtual_time(|_| Flow::from_work(|| Ok(Some(5u32))))
            .expect_subscription()
            .expect_next(|v| *v == 5)
            .expect_complete()
            .verify()
            .unwrap();

        FlowVerifier::with_virtual_time(|_| Flow::<u32>::from_work(|| Ok(None)))
            .expect_subscription()
            .expect_complete()
            .verify()
            .unwrap();

        FlowVerifier::with_virtual_time(|_| {
            Flow::<u32>::from_work(|| Err(WorkError::msg("no value")))
        })
        .expect_subscription()
        .expect_error_matches(|e| matches!(e, WorkError::Failed(m) if m == "no value"))
        .verify()
        .unwrap();
    }

    #[test]
    fn each_subscription_replays_independently() {
        let clock = Arc::new(VirtualScheduler::new());
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));

        let flow = Flow::emit([4u32, 5]);
        let h1 = flow.subscribe(trace_subscriber(&first), clock.clone());
        let h2 = flow.subscribe(trace_subscriber(&second), clock.clone());
        h1.request(Demand::Unbounded);
        h2.request(Demand::Unbounded);
        clock.run_ready();

        let expected = vec!["sub", "next:4", "next:5", "done"];
        assert_eq!(*first.lock(), expected);
        assert_eq!(*second.lock(), expected);
    }

    #[test]
    fn bounded_demand_pauses_and_resumes() {
        let clock = Arc::new(VirtualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = Flow::emit([1u32, 2, 3]).subscribe(trace_subscriber(&log), clock.clone());

        handle.request(Demand::Count(1));
        assert_eq!(*log.lock(), vec!["sub", "next:1"]);

        handle.request(Demand::Count(2));
        assert_eq!(*log.lock(), vec!["sub", "next:1", "next:2", "next:3", "done"]);
    }

    #[test]
    fn cancel_suppresses_everything_after_it() {
        let clock = Arc::new(VirtualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = Flow::emit([1u32, 2, 3, 4, 5]).subscribe(trace_subscriber(&log), clock.clone());
        handle.request(Demand::Count(2));
        handle.cancel();
        handle.request(Demand::Unbounded);
        clock.run_ready();

        assert_eq!(*log.lock(), vec!["sub", "next:1", "next:2"]);
        assert!(handle.is_cancelled());
        assert!(!handle.is_terminated());
    }

    #[test]
    fn request_from_inside_on_signal_is_reentrant() {
        let clock = Arc::new(VirtualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Arc<SubscriptionHandle<u32>>>>> = Arc::new(Mutex::new(None));

        let handle = {
            let log = log.clone();
            let slot = slot.clone();
            Flow::emit([1u32, 2, 3]).subscribe(
                move |sig: Signal<u32>| {
                    let is_next = matches!(sig.kind, SignalKind::Next(_));
                    log.lock().push(label(sig));
                    if is_next {
                        let h = slot.lock().clone();
                        if let Some(h) = h {
                            h.request(Demand::Count(1));
                        }
                    }
                },
                clock.clone(),
            )
        };
        let handle = Arc::new(handle);
        *slot.lock() = Some(handle.clone());

        // One initial credit; each delivery re-requests the next one.
        handle.request(Demand::Count(1));
        assert_eq!(*log.lock(), vec!["sub", "next:1", "next:2", "next:3", "done"]);
    }

    #[test]
    fn real_and_virtual_schedulers_agree_on_the_trace() {
        fn build() -> Flow<u32> {
            Flow::emit([1u32, 2, 3]).then_return(|_| Ok(()))
        }

        let clock = Arc::new(VirtualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = build().subscribe(trace_subscriber(&log), clock.clone());
        handle.request(Demand::Unbounded);
        clock.run_ready();
        let virtual_trace = log.lock().clone();

        let real_trace = collect_real(&build());

        assert_eq!(virtual_trace, real_trace);
        assert_eq!(
            virtual_trace,
            vec!["sub", "next:1", "next:2", "next:3", "done"]
        );
    }

    #[test]
    fn signals_carry_logical_timestamps() {
        let clock = Arc::new(VirtualScheduler::new());
        let stamped = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let stamped = stamped.clone();
            Flow::emit([1u32])
                .delay_first(Duration::from_secs(10))
                .subscribe(
                    move |sig: Signal<u32>| {
                        let at = sig.at;
                        stamped.lock().push((label(sig), at));
                    },
                    clock.clone(),
                )
        };
        handle.request(Demand::Unbounded);
        clock.advance_by(Duration::from_secs(10));

        let got = stamped.lock().clone();
        assert_eq!(got[0], ("sub".to_string(), Duration::ZERO));
        assert_eq!(got[1], ("next:1".to_string(), Duration::from_secs(10)));
        assert_eq!(got[2], ("done".to_string(), Duration::from_secs(10)));
    }

    #[test]
    fn verifier_reports_the_failing_step() {
        let err = FlowVerifier::with_virtual_time(|_| Flow::emit([1u32]))
            .expect_subscription()
            .expect_complete()
            .verify()
            .unwrap_err();

        match err {
            VerifyError::Mismatch { step, .. } => assert_eq!(step, 1),
            other => panic!("expected mismatch, got {other}"),
        }
    }

    #[test]
    fn verifier_flags_a_signal_inside_a_silence_window() {
        let err = FlowVerifier::with_virtual_time(|_| {
            Flow::emit([1u32]).delay_first(Duration::from_millis(5))
        })
        .expect_subscription()
        .expect_no_signal_for(Duration::from_millis(10))
        .verify()
        .unwrap_err();

        match err {
            VerifyError::EarlyDeadline { step, deadline, .. } => {
                assert_eq!(step, 1);
                assert_eq!(deadline, Duration::from_millis(5));
            }
            other => panic!("expected early deadline, got {other}"),
        }
    }
}
