//! Training KPI sinks.
//!
//! Every mini-batch emits a record of labelled arrays. Records travel over
//! a bounded channel to a writer thread; the sender blocks when the writer
//! lags so that no training indicator is lost. Sinks are pluggable: CSV
//! (one file per label, one row per step) and a compact binary container.

use crate::error::Result;
use crate::store;
use crossbeam_channel::{bounded, Receiver, Sender};
use ndarray::Array2;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

/// One training record: label to array, one row per step.
pub type KpiRecord = BTreeMap<String, Array2<f32>>;

/// Capacity of the record channel.
const QUEUE_CAPACITY: usize = 64;

/// Label filter: `all`, or a comma-separated list of regular expressions.
#[derive(Clone, Debug)]
pub struct KpiFilter {
    all: bool,
    patterns: Vec<Regex>,
}

impl KpiFilter {
    /// Accepts every label.
    pub fn all() -> Self {
        Self {
            all: true,
            patterns: Vec::new(),
        }
    }

    /// Parses the filter from the CLI labels argument.
    pub fn parse(labels: &str) -> Result<Self> {
        if labels == "all" {
            return Ok(Self::all());
        }
        let patterns = labels
            .split(',')
            .filter(|s| !s.is_empty())
            .map(Regex::new)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| crate::error::Error::Spec(format!("bad kpi label: {}", e)))?;
        Ok(Self {
            all: false,
            patterns,
        })
    }

    /// Builds the filter from explicit regex patterns.
    pub fn from_patterns(patterns: &[&str]) -> Result<Self> {
        Self::parse(&patterns.join(","))
    }

    pub fn matches(&self, label: &str) -> bool {
        self.all || self.patterns.iter().any(|p| p.is_match(label))
    }
}

/// A destination of KPI records.
pub trait KpiSink: Send {
    fn collect(&mut self, record: &KpiRecord) -> std::io::Result<()>;

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// CSV sink: one file per label under a directory, a row per step.
pub struct CsvSink {
    dir: PathBuf,
    filter: KpiFilter,
    writers: BTreeMap<String, BufWriter<File>>,
}

impl CsvSink {
    pub fn create(dir: &Path, filter: KpiFilter) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            filter,
            writers: BTreeMap::new(),
        })
    }

    fn writer(&mut self, label: &str) -> std::io::Result<&mut BufWriter<File>> {
        if !self.writers.contains_key(label) {
            let file_name = format!("{}.csv", label.replace(['/', '\\'], "_"));
            let file = File::create(self.dir.join(file_name))?;
            self.writers.insert(label.to_string(), BufWriter::new(file));
        }
        Ok(self.writers.get_mut(label).unwrap())
    }
}

impl KpiSink for CsvSink {
    fn collect(&mut self, record: &KpiRecord) -> std::io::Result<()> {
        for (label, array) in record {
            if !self.filter.matches(label) {
                continue;
            }
            let writer = self.writer(label)?;
            for row in array.rows() {
                let mut first = true;
                for value in row {
                    if !first {
                        write!(writer, ",")?;
                    }
                    write!(writer, "{}", value)?;
                    first = false;
                }
                writeln!(writer)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Binary sink: a stream of property-map frames in one file.
pub struct BinarySink {
    writer: BufWriter<File>,
    filter: KpiFilter,
}

/// Magic of the binary KPI container.
pub const KPI_MAGIC: [u8; 4] = *b"WKPI";

impl BinarySink {
    pub fn create(path: &Path, filter: KpiFilter) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&KPI_MAGIC)?;
        writer.write_all(&store::VERSION.to_le_bytes())?;
        Ok(Self { writer, filter })
    }
}

impl KpiSink for BinarySink {
    fn collect(&mut self, record: &KpiRecord) -> std::io::Result<()> {
        let filtered: store::Props = record
            .iter()
            .filter(|(label, _)| self.filter.matches(label))
            .map(|(label, array)| (label.clone(), array.clone().into_dyn()))
            .collect();
        self.writer
            .write_all(&(filtered.len() as u32).to_le_bytes())?;
        store::write_entries(&mut self.writer, &filtered)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Blocking sender side of the KPI channel.
#[derive(Clone, Debug)]
pub struct KpiSender(Sender<KpiRecord>);

impl KpiSender {
    /// Sends a record, blocking while the writer lags.
    pub fn send(&self, record: KpiRecord) {
        if self.0.send(record).is_err() {
            log::warn!("kpi writer is gone, dropping record");
        }
    }
}

/// Background writer consuming the KPI channel into the sinks.
pub struct KpiWriter {
    tx: Option<Sender<KpiRecord>>,
    handle: Option<JoinHandle<()>>,
}

impl KpiWriter {
    /// Spawns the writer thread over the given sinks.
    pub fn spawn(sinks: Vec<Box<dyn KpiSink>>) -> std::io::Result<Self> {
        let (tx, rx): (Sender<KpiRecord>, Receiver<KpiRecord>) = bounded(QUEUE_CAPACITY);
        let handle = std::thread::Builder::new()
            .name("kpi-writer".to_string())
            .spawn(move || {
                let mut sinks = sinks;
                for record in rx.iter() {
                    for sink in &mut sinks {
                        if let Err(e) = sink.collect(&record) {
                            log::error!("kpi sink failed: {}", e);
                        }
                    }
                }
                for sink in &mut sinks {
                    if let Err(e) = sink.flush() {
                        log::error!("kpi sink flush failed: {}", e);
                    }
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> KpiSender {
        KpiSender(self.tx.as_ref().expect("writer closed").clone())
    }

    /// Closes the channel and joins the writer.
    pub fn join(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KpiWriter {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn record() -> KpiRecord {
        let mut record = KpiRecord::new();
        record.insert("delta".to_string(), array![[0.5], [1.5]]);
        record.insert("avgReward".to_string(), array![[0.1], [0.2]]);
        record.insert("grads.direction".to_string(), array![[1.0, 2.0], [3.0, 4.0]]);
        record
    }

    #[test]
    fn test_filter() {
        let filter = KpiFilter::parse("^delta$,^grads\\.").unwrap();
        assert!(filter.matches("delta"));
        assert!(filter.matches("grads.direction"));
        assert!(!filter.matches("avgReward"));
        assert!(KpiFilter::all().matches("anything"));
    }

    #[test]
    fn test_csv_sink() {
        let dir = tempdir().unwrap();
        let mut sink =
            CsvSink::create(dir.path(), KpiFilter::parse("^delta$").unwrap()).unwrap();
        sink.collect(&record()).unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(dir.path().join("delta.csv")).unwrap();
        assert_eq!(content, "0.5\n1.5\n");
        assert!(!dir.path().join("avgReward.csv").exists());
    }

    #[test]
    fn test_writer_thread() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::create(dir.path(), KpiFilter::all()).unwrap();
        let mut writer = KpiWriter::spawn(vec![Box::new(sink)]).unwrap();
        let sender = writer.sender();
        sender.send(record());
        sender.send(record());
        writer.join();

        let content = std::fs::read_to_string(dir.path().join("delta.csv")).unwrap();
        assert_eq!(content.lines().count(), 4);
    }

    #[test]
    fn test_binary_sink_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kpis.bin");
        let mut sink = BinarySink::create(&path, KpiFilter::all()).unwrap();
        sink.collect(&record()).unwrap();
        sink.flush().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[0..4], KPI_MAGIC);
        let count = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        assert_eq!(count, 3);
    }
}
