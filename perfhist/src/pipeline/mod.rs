//! # Ingestion Pipeline
//!
//! One producer thread per event channel; each resolves raw samples and
//! inserts them into the histogram of the sample's event. The caller stays
//! the single consumer driving resorts and decay.
//!
//! ```text
//! Receiver<RawSample> ──► producer 0 ──┐
//! Receiver<RawSample> ──► producer 1 ──┼──► EntryInput[event].add_entry()
//! Receiver<RawSample> ──► producer N ──┘
//!                                           consumer: collapse / output / decay
//! ```
//!
//! The first [`HistError`] stops every producer and is returned from
//! [`Pipeline::join`]. Samples of unknown threads are skipped.

pub mod processor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info};
use perfhist_common::RawSample;

use crate::config::ReportConfig;
use crate::domain::{HistError, PipelineError};
use crate::hist::EntryInput;
use crate::machine::Machine;

pub use processor::{ProcessingStats, SampleProcessor};

/// How long a producer waits on its channel before re-checking the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

type ProducerResult = Result<ProcessingStats, PipelineError>;

pub struct Pipeline {
    machine: Arc<dyn Machine>,
    config: Arc<ReportConfig>,
    /// Insertion handle per event index.
    inputs: Arc<[Arc<EntryInput>]>,
    stop: Arc<AtomicBool>,
    producers: Vec<JoinHandle<ProducerResult>>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        machine: Arc<dyn Machine>,
        config: Arc<ReportConfig>,
        inputs: Vec<Arc<EntryInput>>,
    ) -> Self {
        Self {
            machine,
            config,
            inputs: inputs.into(),
            stop: Arc::new(AtomicBool::new(false)),
            producers: Vec::new(),
        }
    }

    /// Start a producer draining `rx` until it disconnects or the pipeline stops.
    pub fn spawn(&mut self, rx: Receiver<RawSample>) {
        let id = self.producers.len();
        let processor = SampleProcessor::new(Arc::clone(&self.machine), Arc::clone(&self.config));
        let inputs = Arc::clone(&self.inputs);
        let stop = Arc::clone(&self.stop);
        let handle = std::thread::spawn(move || {
            let result = run_producer(id, processor, &inputs, &rx, &stop);
            if result.is_err() {
                stop.store(true, Ordering::SeqCst);
            }
            result
        });
        self.producers.push(handle);
    }

    /// Ask every producer to finish after its current sample.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    /// Wait for every producer and merge their statistics.
    ///
    /// # Errors
    /// The first producer error, or [`PipelineError::ProducerPanicked`].
    pub fn join(self) -> Result<ProcessingStats, PipelineError> {
        let mut total = ProcessingStats::default();
        let mut first_error = None;
        for (id, handle) in self.producers.into_iter().enumerate() {
            let outcome = handle
                .join()
                .map_err(|_| PipelineError::ProducerPanicked(id))
                .and_then(|result| result);
            match outcome {
                Ok(stats) => total.merge(&stats),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!("pipeline finished: {total}");
                Ok(total)
            }
        }
    }
}

fn run_producer(
    id: usize,
    mut processor: SampleProcessor,
    inputs: &[Arc<EntryInput>],
    rx: &Receiver<RawSample>,
    stop: &AtomicBool,
) -> ProducerResult {
    while !stop.load(Ordering::SeqCst) {
        let raw = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(raw) => raw,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let input = inputs.get(raw.event).ok_or(HistError::UnknownEvent {
            index: raw.event,
            count: inputs.len(),
        })?;
        match processor.process(&raw) {
            Ok(samples) => {
                for sample in &samples {
                    input.add_entry(sample)?;
                }
            }
            Err(PipelineError::UnknownThread { pid, tid }) => {
                debug!("producer {id}: skipping sample of unknown {pid} {tid}");
            }
            Err(e) => return Err(e),
        }
    }
    debug!("producer {id} done: {}", processor.stats);
    Ok(processor.stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Pid, Tid};
    use crate::hist::HistogramTable;
    use crate::machine::StaticMachine;
    use crossbeam_channel::bounded;

    fn create_test_machine() -> Arc<dyn Machine> {
        let mut machine = StaticMachine::new();
        machine.add_thread(Pid(1), Tid(1), "one");
        machine.add_thread(Pid(2), Tid(2), "two");
        Arc::new(machine)
    }

    fn raw(tid: i32, event: usize, period: u64) -> RawSample {
        RawSample {
            event,
            pid: tid,
            tid,
            ip: 0x1000,
            period,
            ..RawSample::default()
        }
    }

    #[test]
    fn test_producers_feed_one_table() {
        let config = Arc::new(ReportConfig::with_sort("comm").unwrap());
        let mut table = HistogramTable::new(Arc::clone(&config));
        let mut pipeline =
            Pipeline::new(create_test_machine(), config, vec![Arc::clone(table.input())]);

        let mut senders = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = bounded(16);
            pipeline.spawn(rx);
            senders.push(tx);
        }
        for (i, tx) in senders.iter().enumerate() {
            for n in 0..50 {
                tx.send(raw(1 + i32::from(n % 2 == 0), 0, 1 + i as u64)).unwrap();
            }
            tx.send(raw(77, 0, 1)).unwrap();
        }
        drop(senders);

        let stats = pipeline.join().unwrap();
        assert_eq!(stats.samples, 153);
        assert_eq!(stats.resolved, 150);
        assert_eq!(stats.unknown_thread, 3);

        table.collapse_resort().unwrap();
        table.output_resort().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.totals().total_period, 50 * (1 + 2 + 3));
        assert_eq!(table.totals().nr_samples, 150);
    }

    #[test]
    fn test_unknown_event_aborts() {
        let config = Arc::new(ReportConfig::with_sort("comm").unwrap());
        let table = HistogramTable::new(Arc::clone(&config));
        let mut pipeline =
            Pipeline::new(create_test_machine(), config, vec![Arc::clone(table.input())]);
        let (tx, rx) = bounded(4);
        pipeline.spawn(rx);
        tx.send(raw(1, 5, 1)).unwrap();

        let err = pipeline.join().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Hist(HistError::UnknownEvent { index: 5, count: 1 })
        ));
        drop(tx);
    }
}
