//! End-to-end runs through sessions, the pipeline and diffing.

use std::sync::Arc;

use crossbeam_channel::bounded;
use perfhist::config::ReportConfig;
use perfhist::domain::{PipelineError, Pid, Tid};
use perfhist::hist::HistEntry;
use perfhist::machine::{Machine, StaticMachine, SymbolResolver, ThreadModel};
use perfhist::pipeline::Pipeline;
use perfhist::replay::ReplayFile;
use perfhist::sample::ResolvedSample;
use perfhist::session::ReportSession;
use perfhist_common::{CpuMode, RawSample, PERF_CONTEXT_KERNEL, PERF_CONTEXT_USER};

fn create_test_machine() -> StaticMachine {
    let mut machine = StaticMachine::new();
    machine.add_thread(Pid(1), Tid(1), "app");
    machine.add_thread(Pid(1), Tid(2), "app");
    machine.add_map(Some(Pid(1)), 0x1000, 0x2000, 0, "app").unwrap();
    machine.add_symbol("app", 0x000, 0x100, "foo");
    machine.add_symbol("app", 0x100, 0x200, "bar");
    machine.add_symbol("app", 0x200, 0x300, "baz");
    machine.add_symbol("app", 0x300, 0x400, "main");
    machine.add_map(None, 0xffff_0000, 0xffff_1000, 0, "[kernel]").unwrap();
    machine.add_symbol("[kernel]", 0x000, 0x1000, "entry_SYSCALL_64");
    machine
}

const FOO: u64 = 0x1010;
const BAR: u64 = 0x1110;
const BAZ: u64 = 0x1210;
const MAIN: u64 = 0x1310;

fn sample(machine: &StaticMachine, tid: i32, addr: u64, period: u64) -> ResolvedSample {
    let thread = machine.find_thread(Pid(1), Tid(tid)).unwrap();
    let location = machine.resolve(&thread, CpuMode::User, addr);
    ResolvedSample::new(thread, location, period)
}

fn symbol_of(entry: &HistEntry) -> String {
    entry.location().display_name()
}

fn session_with(machine: &StaticMachine, sort: &str, samples: &[(u64, u64)]) -> ReportSession {
    let config = Arc::new(ReportConfig::with_sort(sort).unwrap());
    let mut session = ReportSession::new(config, ["cycles"]);
    for &(addr, period) in samples {
        session.add_sample(0, &sample(machine, 1, addr, period)).unwrap();
    }
    session.resort().unwrap();
    session
}

#[test]
fn test_symbol_report_end_to_end() {
    let machine = create_test_machine();
    let config = Arc::new(ReportConfig::with_sort("symbol").unwrap());
    let mut session = ReportSession::new(config, ["cycles"]);
    session.add_sample(0, &sample(&machine, 1, FOO, 10)).unwrap();
    session.add_sample(0, &sample(&machine, 1, FOO + 8, 5)).unwrap();
    session.add_sample(0, &sample(&machine, 2, BAR, 7)).unwrap();
    session.resort().unwrap();

    let table = session.event(0).unwrap().table();
    let rows: Vec<(String, u64, u64)> = table
        .entries()
        .map(|e| (symbol_of(e), e.stat().period, e.stat().nr_events))
        .collect();
    assert_eq!(
        rows,
        vec![("foo".to_string(), 15, 2), ("bar".to_string(), 7, 1)]
    );
    assert_eq!(table.totals().total_period, 22);
}

#[test]
fn test_link_creates_one_placeholder() {
    let machine = create_test_machine();
    let mut s1 = session_with(&machine, "symbol", &[(FOO, 10)]);
    let mut s2 = session_with(&machine, "symbol", &[(FOO, 4), (BAZ, 6)]);

    let t1 = s1.event_mut(0).unwrap().table_mut();
    let t2 = s2.event_mut(0).unwrap().table_mut();
    assert_eq!(t1.match_entries(t2), 1);
    assert_eq!(t1.link(t2).unwrap(), 1);
    t1.output_resort().unwrap();

    let placeholders: Vec<&HistEntry> = t1.entries().filter(|e| e.is_placeholder()).collect();
    assert_eq!(placeholders.len(), 1);
    assert_eq!(symbol_of(placeholders[0]), "baz");
    assert_eq!(placeholders[0].stat().period, 0);
    let baz = t2.entries().find(|e| symbol_of(e) == "baz").unwrap();
    assert_eq!(placeholders[0].pair(), Some(baz.id()));
    assert_eq!(baz.pair(), Some(placeholders[0].id()));
    assert!(t2.entries().all(|e| !e.is_placeholder()));

    // Linking again finds everything paired.
    assert_eq!(t1.link(t2).unwrap(), 0);
}

#[test]
fn test_diff_reports_deltas_and_displacement() {
    let machine = create_test_machine();
    let mut baseline = session_with(&machine, "symbol", &[(FOO, 60), (BAR, 30), (MAIN, 10)]);
    let mut new = session_with(&machine, "symbol", &[(FOO, 20), (BAR, 50), (BAZ, 30)]);

    let reports = new.diff(&mut baseline).unwrap();
    assert_eq!(reports.len(), 1);
    let rows = &reports[0].rows;
    let row = |name: &str| {
        rows.iter()
            .find(|r| r.columns.first().is_some_and(|c| c.ends_with(name)))
            .unwrap()
    };

    let bar = row("bar");
    assert!((bar.new_percent - 50.0).abs() < 1e-9);
    assert!((bar.baseline_percent - 30.0).abs() < 1e-9);
    assert!((bar.delta - 20.0).abs() < 1e-9);
    assert_eq!(bar.displacement, Some(1));

    let foo = row("foo");
    assert!((foo.delta + 40.0).abs() < 1e-9);
    assert_eq!(foo.displacement, Some(-2));

    let baz = row("baz");
    assert_eq!(baz.baseline_period, 0);
    assert_eq!(baz.displacement, None);

    let main = row("main");
    assert!(main.placeholder);
    assert_eq!(main.new_period, 0);
    assert!((main.baseline_percent - 10.0).abs() < 1e-9);
}

#[test]
fn test_pipeline_producers_share_tables() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: u64 = 250;

    let machine: Arc<dyn Machine> = Arc::new(create_test_machine());
    let config = Arc::new(
        ReportConfig::builder()
            .sort("pid,symbol")
            .callchain("graph,0")
            .build()
            .unwrap(),
    );
    let mut session = ReportSession::new(Arc::clone(&config), ["cycles", "instructions"]);
    let mut pipeline = Pipeline::new(machine, config, session.inputs());

    let mut senders = Vec::new();
    for _ in 0..PRODUCERS {
        let (tx, rx) = bounded(16);
        pipeline.spawn(rx);
        senders.push(tx);
    }
    let feeders: Vec<_> = senders
        .into_iter()
        .enumerate()
        .map(|(n, tx)| {
            std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let ip = [FOO, BAR, BAZ][(i % 3) as usize];
                    let raw = RawSample {
                        event: n % 2,
                        pid: 1,
                        tid: 1 + (n % 2) as i32,
                        ip,
                        period: 1 + i % 5,
                        callchain: Some(vec![PERF_CONTEXT_KERNEL, 0xffff_0010, PERF_CONTEXT_USER, ip, MAIN]),
                        ..RawSample::default()
                    };
                    tx.send(raw).unwrap();
                }
            })
        })
        .collect();
    for feeder in feeders {
        feeder.join().unwrap();
    }

    let stats = pipeline.join().unwrap();
    assert_eq!(stats.samples, PRODUCERS as u64 * PER_PRODUCER);
    session.record_stats(&stats);
    session.resort().unwrap();

    let expected_per_event: u64 = (0..PER_PRODUCER).map(|i| 1 + i % 5).sum::<u64>() * 2;
    for event in session.events() {
        let table = event.table();
        assert_eq!(table.totals().total_period, expected_per_event, "{}", event.name());
        assert_eq!(table.len(), 3);
        for entry in table.entries() {
            let chain = entry.callchain().unwrap();
            assert_eq!(chain.total_hits(), entry.stat().period);
        }
    }
}

#[test]
fn test_pipeline_rejects_unknown_event() {
    let machine: Arc<dyn Machine> = Arc::new(create_test_machine());
    let config = Arc::new(ReportConfig::with_sort("comm").unwrap());
    let session = ReportSession::new(Arc::clone(&config), ["cycles"]);
    let mut pipeline = Pipeline::new(machine, config, session.inputs());

    let (tx, rx) = bounded(4);
    pipeline.spawn(rx);
    tx.send(RawSample {
        event: 3,
        pid: 1,
        tid: 1,
        ..RawSample::default()
    })
    .unwrap();
    drop(tx);

    assert!(matches!(pipeline.join(), Err(PipelineError::Hist(_))));
}

#[test]
fn test_replay_file_drives_session() {
    let json = r#"{
        "events": ["cycles", "cache-misses"],
        "threads": [{ "pid": 7, "tid": 7, "comm": "worker" }],
        "maps": [{ "pid": 7, "start": 4096, "end": 8192, "dso": "worker",
                   "symbols": [{ "start": 0, "end": 4096, "name": "run" }] }],
        "samples": [
            { "pid": 7, "tid": 7, "ip": 4100, "period": 3 },
            { "event": 1, "pid": 7, "tid": 7, "ip": 4200, "period": 9 }
        ]
    }"#;
    let replay = ReplayFile::from_json(json).unwrap();
    let machine: Arc<dyn Machine> = Arc::new(replay.machine().unwrap());
    let config = Arc::new(ReportConfig::with_sort("dso,symbol").unwrap());
    let mut session = ReportSession::new(Arc::clone(&config), replay.events.iter().cloned());

    let mut pipeline = Pipeline::new(machine, config, session.inputs());
    let (tx, rx) = bounded(replay.samples.len());
    pipeline.spawn(rx);
    for raw in &replay.samples {
        tx.send(raw.clone()).unwrap();
    }
    drop(tx);
    session.record_stats(&pipeline.join().unwrap());
    session.resort().unwrap();

    let misses = session.find_event("cache-misses").unwrap().table();
    assert_eq!(misses.totals().total_period, 9);
    assert_eq!(symbol_of(misses.entries().next().unwrap()), "run");
    assert_eq!(session.stats().resolved, 2);
}
