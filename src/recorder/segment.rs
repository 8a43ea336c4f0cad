//! Segment rollover
//!
//! Output is split into files of the configured length. Rollover is counted
//! in captured frames from the session start, so consecutive segments join
//! without gaps or overlap even when the capture clock drifts from the wall
//! clock.

use super::encoder::{open_encoder, EncodeResult, OutputFormat, SegmentEncoder};
use super::state::LoggerConfig;
use crate::capture::StreamFormat;
use chrono::{DateTime, Days, Local, NaiveDateTime, TimeZone};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name timestamp format, also used for dated sub-folders
pub(crate) const FILE_STAMP: &str = "%Y-%m-%d_%H-%M-%S";

/// Decides where each segment ends
#[derive(Debug, Clone, Copy)]
pub struct SegmentSchedule {
    length: Duration,
    align: bool,
}

impl SegmentSchedule {
    pub fn new(length: Duration, align: bool) -> Self {
        Self { length, align }
    }

    /// The boundary ending the segment that starts at `start`.
    ///
    /// Aligned schedules end on the next multiple of the segment length
    /// since local midnight and never run past midnight.
    pub fn next_boundary(&self, start: DateTime<Local>) -> DateTime<Local> {
        let length = chrono::Duration::from_std(self.length).unwrap_or(chrono::Duration::hours(1));
        if !self.align {
            return start + length;
        }

        let naive = start.naive_local();
        let Some(midnight) = naive.date().and_hms_opt(0, 0, 0) else {
            return start + length;
        };
        let len_ms = length.num_milliseconds().max(1);
        let since_ms = (naive - midnight).num_milliseconds();
        let periods = since_ms / len_ms + 1;
        let mut boundary = midnight + chrono::Duration::milliseconds(periods * len_ms);

        if let Some(next_midnight) = midnight.checked_add_days(Days::new(1)) {
            boundary = boundary.min(next_midnight);
        }

        to_local(boundary).unwrap_or(start + length)
    }
}

fn to_local(naive: NaiveDateTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&naive).earliest()
}

/// Frames of audio between two instants, never less than one
fn frames_between(start: DateTime<Local>, end: DateTime<Local>, sample_rate: u32) -> u64 {
    let micros = (end - start).num_microseconds().unwrap_or(0).max(0) as u128;
    ((micros * sample_rate as u128 / 1_000_000) as u64).max(1)
}

/// Path for a segment starting at `start`.
///
/// Organised output goes to `root/YYYY/MM/DD/`; an existing file with the
/// same name gets a numeric suffix.
pub fn segment_path(
    root: &Path,
    start: DateTime<Local>,
    organise: bool,
    format: OutputFormat,
) -> PathBuf {
    let dir = if organise {
        root.join(start.format("%Y").to_string())
            .join(start.format("%m").to_string())
            .join(start.format("%d").to_string())
    } else {
        root.to_path_buf()
    };

    let stem = start.format(FILE_STAMP).to_string();
    let ext = format.extension();
    let mut path = dir.join(format!("{}.{}", stem, ext));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.{}", stem, n, ext));
        n += 1;
    }
    path
}

/// Segment lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    Started(PathBuf),
    Finished(PathBuf),
}

/// Totals for the segments written in one session
#[derive(Debug, Clone, Default)]
pub struct SegmentTotals {
    pub segments: Vec<PathBuf>,
    pub frames_written: u64,
}

/// Writes captured audio into rolling segment files
pub struct SegmentWriter {
    root: PathBuf,
    organise: bool,
    format: OutputFormat,
    bitrate: u32,
    stream: StreamFormat,
    schedule: SegmentSchedule,
    current: Option<Box<dyn SegmentEncoder>>,
    boundary: DateTime<Local>,
    frames_left: u64,
    totals: SegmentTotals,
}

impl SegmentWriter {
    /// Open the first segment of a session starting at `start`
    pub fn open(
        config: &LoggerConfig,
        stream: StreamFormat,
        start: DateTime<Local>,
    ) -> EncodeResult<Self> {
        let schedule = SegmentSchedule::new(config.segment_length, config.align_segments);
        let mut writer = Self {
            root: config.folder.clone(),
            organise: config.organise_folder,
            format: config.format,
            bitrate: config.bitrate,
            stream,
            schedule,
            current: None,
            boundary: start,
            frames_left: 0,
            totals: SegmentTotals::default(),
        };
        writer.open_segment(start)?;
        Ok(writer)
    }

    /// Path of the segment being written
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|encoder| encoder.path())
    }

    fn open_segment(&mut self, start: DateTime<Local>) -> EncodeResult<PathBuf> {
        let path = segment_path(&self.root, start, self.organise, self.format);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let encoder = open_encoder(self.format, &path, self.stream, self.bitrate)?;
        self.boundary = self.schedule.next_boundary(start);
        self.frames_left = frames_between(start, self.boundary, self.stream.sample_rate);
        self.current = Some(encoder);

        tracing::info!("Opened segment {:?} (until {})", path, self.boundary.format("%H:%M:%S"));
        Ok(path)
    }

    /// Finalize the open segment, if any, returning its path
    pub fn close_segment(&mut self) -> EncodeResult<Option<PathBuf>> {
        match self.current.take() {
            Some(encoder) => {
                let path = encoder.finish()?;
                tracing::info!("Finalized segment {:?}", path);
                self.totals.segments.push(path.clone());
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    /// Append interleaved samples, rolling to a new segment at each boundary
    pub fn write(&mut self, samples: &[f32]) -> EncodeResult<Vec<SegmentEvent>> {
        let channels = self.stream.channels.max(1) as usize;
        let mut events = Vec::new();
        let mut rest = &samples[..samples.len() - samples.len() % channels];

        while !rest.is_empty() {
            if self.frames_left == 0 {
                let start = self.boundary;
                if let Some(finished) = self.close_segment()? {
                    events.push(SegmentEvent::Finished(finished));
                }
                events.push(SegmentEvent::Started(self.open_segment(start)?));
            }

            let frames = (rest.len() / channels) as u64;
            let take = frames.min(self.frames_left) as usize;
            let (head, tail) = rest.split_at(take * channels);

            if let Some(encoder) = self.current.as_mut() {
                encoder.write(head)?;
            }
            self.frames_left -= take as u64;
            self.totals.frames_written += take as u64;
            rest = tail;
        }

        Ok(events)
    }

    /// Totals so far; segments still open are not included
    pub fn into_totals(self) -> SegmentTotals {
        self.totals
    }
}
