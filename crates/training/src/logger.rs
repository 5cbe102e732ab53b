//! Append-only CSV run log.

use crate::error::{TrainingError, TrainingResult};
use crate::metrics::Prf1a;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub const RUN_LOG_HEADER: &str = "ID,TYPE,EPOCH,BATCH,PRECISION,RECALL,F1,ACCURACY,LOSS";

const RUN_LOG_COLUMNS: [&str; 9] = [
    "ID", "TYPE", "EPOCH", "BATCH", "PRECISION", "RECALL", "F1", "ACCURACY", "LOSS",
];

/// Row kind written to the TYPE column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Train = 0,
    Eval = 1,
}

/// One record of the run log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub id: String,
    pub kind: RowKind,
    pub epoch: usize,
    pub batch: usize,
    pub score: Prf1a,
    pub loss: f32,
}

impl LogRow {
    fn record(&self) -> [String; 9] {
        [
            self.id.clone(),
            (self.kind as u8).to_string(),
            self.epoch.to_string(),
            self.batch.to_string(),
            self.score.precision.to_string(),
            self.score.recall.to_string(),
            self.score.f1.to_string(),
            self.score.accuracy.to_string(),
            self.loss.to_string(),
        ]
    }
}

/// Header-first CSV sink. Every row is flushed as it is written, and fields
/// containing separators or quotes are quoted.
pub struct RunLog<W: Write> {
    writer: csv::Writer<W>,
}

impl RunLog<File> {
    pub fn create(path: &Path) -> TrainingResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| TrainingError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| TrainingError::io(path, e))?;
        RunLog::from_writer(file)
    }
}

impl<W: Write> RunLog<W> {
    pub fn from_writer(writer: W) -> TrainingResult<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        writer.write_record(RUN_LOG_COLUMNS)?;
        writer.flush().map_err(csv::Error::from)?;
        Ok(Self { writer })
    }

    pub fn append(&mut self, row: &LogRow) -> TrainingResult<()> {
        self.writer.write_record(row.record())?;
        self.writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    pub fn close(mut self) -> TrainingResult<()> {
        self.writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_follow_header() {
        let mut log = RunLog::from_writer(Vec::new()).unwrap();
        log.append(&LogRow {
            id: "0".into(),
            kind: RowKind::Train,
            epoch: 1,
            batch: 3,
            score: Prf1a {
                precision: 1.0,
                recall: 0.5,
                f1: 0.75,
                accuracy: 0.25,
            },
            loss: 0.5,
        })
        .unwrap();
        let text = String::from_utf8(log.get_ref().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![RUN_LOG_HEADER, "0,0,1,3,1,0.5,0.75,0.25,0.5"]);
    }

    #[test]
    fn create_makes_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/run/log.csv");
        let log = RunLog::create(&path).unwrap();
        log.close().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), RUN_LOG_HEADER);
    }

    #[test]
    fn header_matches_columns() {
        assert_eq!(RUN_LOG_COLUMNS.join(","), RUN_LOG_HEADER);
    }

    #[test]
    fn ids_with_separators_stay_in_one_column() {
        let mut log = RunLog::from_writer(Vec::new()).unwrap();
        log.append(&LogRow {
            id: "scan,v2.png".into(),
            kind: RowKind::Eval,
            epoch: 0,
            batch: 0,
            score: Prf1a::default(),
            loss: 0.0,
        })
        .unwrap();

        let mut reader = csv::Reader::from_reader(log.get_ref().as_slice());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 9);
        let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 9);
        assert_eq!(&records[0][0], "scan,v2.png");
        assert_eq!(&records[0][1], "1");
    }
}
