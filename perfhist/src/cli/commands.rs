//! Subcommand runners.
//!
//! Each runner loads its replay file(s), builds the machine model, feeds the
//! samples through the ingestion pipeline and renders into `out`. JSON
//! export is written alongside when requested.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender};
use log::{debug, info, warn};
use perfhist_common::{Dso, RawSample, Thread};
use serde::Serialize;

use super::args::{C2cArgs, DiffArgs, HistArgs, ReportArgs, TopArgs};
use crate::config::ReportConfig;
use crate::display;
use crate::domain::PipelineError;
use crate::export::{write_json, C2cExport, DiffExport, ReportExport};
use crate::machine::Machine;
use crate::pipeline::{Pipeline, ProcessingStats, SampleProcessor};
use crate::replay::ReplayFile;
use crate::session::c2c::LINE_SORT;
use crate::session::{CachelineReport, ReportSession};

/// Per-producer channel depth used for batch ingestion.
const CHANNEL_CAPACITY: usize = 1024;

/// Feed `samples` through `producers` pipeline threads into `session`.
///
/// # Errors
/// The first producer error; samples already inserted stay in the session.
pub fn ingest(
    session: &mut ReportSession,
    machine: Arc<dyn Machine>,
    samples: &[RawSample],
    producers: usize,
) -> Result<ProcessingStats, PipelineError> {
    let mut pipeline = Pipeline::new(machine, Arc::clone(session.config()), session.inputs());
    let senders = spawn_producers(&mut pipeline, producers, CHANNEL_CAPACITY);
    let sent = feed(&senders, samples);
    drop(senders);
    debug!("queued {sent} of {} samples", samples.len());

    let stats = pipeline.join()?;
    session.record_stats(&stats);
    Ok(stats)
}

fn spawn_producers(
    pipeline: &mut Pipeline,
    producers: usize,
    capacity: usize,
) -> Vec<Sender<RawSample>> {
    (0..producers.max(1))
        .map(|_| {
            let (tx, rx) = bounded(capacity);
            pipeline.spawn(rx);
            tx
        })
        .collect()
}

/// Round-robin `samples` over `senders`; stops early once a producer has
/// gone away. Returns the number of samples queued.
fn feed(senders: &[Sender<RawSample>], samples: &[RawSample]) -> usize {
    if senders.is_empty() {
        return 0;
    }
    for (i, (raw, tx)) in samples.iter().zip(senders.iter().cycle()).enumerate() {
        if tx.send(raw.clone()).is_err() {
            warn!("producer stopped; {} samples not queued", samples.len() - i);
            return i;
        }
    }
    samples.len()
}

/// Queue one batch from the blocking pool, so a full channel never stalls
/// the runtime. True when every sample was queued.
async fn feed_batch(senders: &[Sender<RawSample>], samples: &[RawSample]) -> Result<bool> {
    let senders = senders.to_vec();
    let batch = samples.to_vec();
    tokio::task::spawn_blocking(move || feed(&senders, &batch) == batch.len())
        .await
        .context("Sample feeder failed")
}

/// Load `file` and ingest it into a fresh session built from `hist`.
fn load_session(
    hist: &HistArgs,
    file: &std::path::Path,
    producers: usize,
) -> Result<(ReplayFile, ReportSession)> {
    let config = Arc::new(hist.config()?);
    let replay = ReplayFile::load(file)?;
    let machine: Arc<dyn Machine> = Arc::new(replay.machine()?);
    let mut session = ReportSession::new(config, replay.events.iter().cloned());
    ingest(&mut session, machine, &replay.samples, producers)
        .with_context(|| format!("Failed to ingest {}", file.display()))?;
    Ok((replay, session))
}

// ============================================================================
// report
// ============================================================================

pub fn report(args: &ReportArgs, quiet: bool, out: &mut dyn Write) -> Result<ReportSession> {
    let (replay, mut session) = load_session(&args.hist, &args.file, args.producers)?;
    session.resort()?;

    let dso = args.dso.as_ref().map(|name| Dso::new(name.as_str(), false));
    let thread = match args.tid {
        Some(tid) => {
            let desc = replay
                .threads
                .iter()
                .find(|t| t.tid == tid)
                .with_context(|| format!("No thread {tid} in {}", args.file.display()))?;
            Some(Thread::new(desc.pid, desc.tid, desc.comm.as_str()))
        }
        None => None,
    };
    for table in session.tables_mut() {
        table.filter_by_dso(dso.as_ref());
        table.filter_by_thread(thread.as_ref());
        table.filter_by_symbol(args.symbol_filter.as_deref());
    }

    if !quiet {
        writeln!(out, "# {}", session.stats())?;
    }
    display::write_report(out, &session, None)?;

    if let Some(path) = &args.json {
        write_json(&ReportExport::from_session(&session), path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("report written to {}", path.display());
    }
    Ok(session)
}

// ============================================================================
// diff
// ============================================================================

pub fn diff(args: &DiffArgs, quiet: bool, out: &mut dyn Write) -> Result<()> {
    let (_, mut baseline) = load_session(&args.hist, &args.baseline, 1)?;
    let (_, mut new) = load_session(&args.hist, &args.new, 1)?;
    let reports = new.diff(&mut baseline)?;

    let headers: Vec<&str> = new.config().sort.columns().map(|key| key.header()).collect();
    if !quiet {
        writeln!(out, "# Baseline: {}", args.baseline.display())?;
        writeln!(out, "# New: {}", args.new.display())?;
    }
    display::write_diff(out, &reports, &headers, args.displacement)?;

    if let Some(path) = &args.json {
        write_json(&DiffExport::new(&new, reports), path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

// ============================================================================
// c2c
// ============================================================================

pub fn c2c(args: &C2cArgs, quiet: bool, out: &mut dyn Write) -> Result<CachelineReport> {
    let replay = ReplayFile::load(&args.file)?;
    let config = ReportConfig::builder()
        .sort(LINE_SORT)
        .cacheline_size(args.cacheline_size)
        .build()?;
    let machine: Arc<dyn Machine> = Arc::new(replay.machine()?);
    let mut processor = SampleProcessor::new(machine, Arc::new(config));
    let mut report = CachelineReport::new(args.cacheline_size)?;

    for raw in &replay.samples {
        match processor.process(raw) {
            Ok(samples) => {
                for sample in &samples {
                    report.add_sample(sample)?;
                }
            }
            Err(PipelineError::UnknownThread { pid, tid }) => {
                debug!("skipping sample of unknown thread {tid} in {pid}");
            }
            Err(e) => return Err(e.into()),
        }
    }
    report.resort()?;

    if !quiet {
        writeln!(out, "# {}", processor.stats)?;
    }
    display::write_c2c(out, &report)?;

    if let Some(path) = &args.json {
        write_json(&C2cExport::new(&report, args.cacheline_size), path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(report)
}

// ============================================================================
// top
// ============================================================================

/// Outcome of a `top` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TopSummary {
    pub refreshes: u64,
    pub evicted: usize,
    pub interrupted: bool,
}

/// Replay `args.file` in batches, one batch per refresh. Every refresh
/// decays the tables, resorts them and prints the top entries. Ctrl+C stops
/// early.
pub async fn top(args: &TopArgs, quiet: bool, out: &mut dyn Write) -> Result<TopSummary> {
    let config = Arc::new(args.hist.config()?);
    let replay = ReplayFile::load(&args.file)?;
    let machine: Arc<dyn Machine> = Arc::new(replay.machine()?);
    let mut session = ReportSession::new(Arc::clone(&config), replay.events.iter().cloned());

    let batch = args.batch.max(1);
    let mut pipeline = Pipeline::new(machine, config, session.inputs());
    let mut senders = spawn_producers(&mut pipeline, args.producers, batch);
    let mut batches = replay.samples.chunks(batch);
    let refresh = Duration::from_millis(args.refresh_ms.max(1));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut summary = TopSummary::default();
    loop {
        let queued = match batches.next() {
            Some(samples) if !senders.is_empty() => tokio::select! {
                queued = feed_batch(&senders, samples) => queued?,
                _ = &mut ctrl_c => {
                    info!("interrupted while queueing, stopping producers");
                    pipeline.stop();
                    summary.interrupted = true;
                    false
                }
            },
            _ => false,
        };
        if !queued {
            senders.clear();
        }
        let exhausted = senders.is_empty();

        if !summary.interrupted {
            tokio::select! {
                () = tokio::time::sleep(refresh) => {}
                _ = &mut ctrl_c => {
                    info!("interrupted, stopping producers");
                    pipeline.stop();
                    summary.interrupted = true;
                }
            }
        }

        summary.evicted += session.decay(args.zap_user, args.zap_kernel);
        session.resort()?;
        summary.refreshes += 1;
        if !quiet {
            writeln!(out, "# Refresh {} ({} evicted so far)", summary.refreshes, summary.evicted)?;
        }
        display::write_report(out, &session, Some(args.limit))?;
        out.flush()?;

        if summary.interrupted || exhausted {
            break;
        }
    }
    drop(senders);

    let stats = pipeline.join()?;
    session.record_stats(&stats);
    if !quiet {
        writeln!(out, "# {stats}")?;
    }
    info!(
        "top finished after {} refreshes, {} entries evicted",
        summary.refreshes, summary.evicted
    );
    Ok(summary)
}
