//! Data probe: taps a transfer path to record PCM frames into per-channel
//! wav files, or to inject frames from such files into the stream.
//!
//! The probe is driven from the real-time transfer path, so its observable
//! state (`started`, `mode`) is atomic: while no probing runs, the hot path
//! pays exactly one relaxed load. Record and inject are mutually exclusive;
//! the probe stops itself once the configured duration has been processed.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use hound::{SampleFormat as WavSampleFormat, WavReader, WavSpec, WavWriter};
use log::{error, info, warn};
use thiserror::Error;

use crate::area::AudioArea;
use crate::copier::copy_audio_area_buffers;
use crate::types::SampleFormat;

const LOG: &str = "probe";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probing already running, wait until finished")]
    AlreadyStarted,
    #[error("operation not allowed in the current probing mode")]
    WrongMode,
    #[error("invalid probing parameter: {0}")]
    InvalidParam(&'static str),
    #[error("wav file header does not match the requested parameters: {0}")]
    HeaderMismatch(&'static str),
    #[error("wav file error: {0}")]
    File(#[from] hound::Error),
}

/// Outcome of a probe processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Frames were recorded or injected.
    Processed,
    /// The configured duration is exhausted; the probe has stopped itself.
    Finished,
    /// No probing operation is running.
    NoOp,
}

/// Start/stop request for a probe, as marshalled through control queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbingAction {
    Start,
    Stop,
}

/// Parameters of a probing operation.
#[derive(Debug, Clone)]
pub struct ProbingParams {
    /// File name prefix; each channel gets `<prefix>_ch<N>.wav`.
    pub name_prefix: String,
    /// Duration in seconds.
    pub duration_s: u32,
    /// Inject from files instead of recording into them.
    pub is_inject: bool,
    pub num_channels: u32,
    /// First channel index inside the tapped areas.
    pub start_index: u32,
    pub sample_rate: u32,
    pub data_format: SampleFormat,
}

/// A probing request paired with its action.
#[derive(Debug, Clone)]
pub struct ProbingQueueEntry {
    pub action: ProbingAction,
    pub params: ProbingParams,
}

const MODE_IDLE: u8 = 0;
const MODE_INJECT: u8 = 1;
const MODE_RECORD: u8 = 2;

enum ChannelFile {
    Reader {
        reader: WavReader<BufReader<File>>,
        position: u32,
    },
    Writer(WavWriter<BufWriter<File>>),
}

pub struct DataProbe {
    mode: AtomicU8,
    started: AtomicBool,
    files: Vec<ChannelFile>,
    data_format: SampleFormat,
    num_channels: u32,
    start_index: u32,
    buffer_size: u32,
    intermediate: Vec<u8>,
    areas: Vec<AudioArea>,
    frames_to_process: u32,
}

impl Default for DataProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProbe {
    pub fn new() -> Self {
        DataProbe {
            mode: AtomicU8::new(MODE_IDLE),
            started: AtomicBool::new(false),
            files: Vec::new(),
            data_format: SampleFormat::Float32,
            num_channels: 0,
            start_index: 0,
            buffer_size: 0,
            intermediate: Vec::new(),
            areas: Vec::new(),
            frames_to_process: 0,
        }
    }

    /// Whether a probing operation is currently running. Hot-path check.
    #[inline]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    fn wav_spec(format: SampleFormat, sample_rate: u32) -> WavSpec {
        let (bits, sf) = match format {
            SampleFormat::Int16 => (16, WavSampleFormat::Int),
            SampleFormat::Int32 => (32, WavSampleFormat::Int),
            SampleFormat::Float32 => (32, WavSampleFormat::Float),
        };
        WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: bits,
            sample_format: sf,
        }
    }

    fn check_start(&self, params: &ProbingParams, wanted_mode: u8) -> Result<(), ProbeError> {
        let mode = self.mode.load(Ordering::Relaxed);
        if mode != MODE_IDLE && mode != wanted_mode {
            return Err(ProbeError::WrongMode);
        }
        if self.started.load(Ordering::Relaxed) {
            return Err(ProbeError::AlreadyStarted);
        }
        if params.name_prefix.is_empty() {
            return Err(ProbeError::InvalidParam("file name must not be empty"));
        }
        if params.num_channels == 0 {
            return Err(ProbeError::InvalidParam("number of channels must not be zero"));
        }
        if params.sample_rate == 0 {
            return Err(ProbeError::InvalidParam("sample rate must not be zero"));
        }
        Ok(())
    }

    fn setup_intermediate(&mut self, params: &ProbingParams, buffer_size: u32) {
        let sample_size = params.data_format.sample_size();
        self.intermediate = vec![0u8; params.num_channels as usize * buffer_size as usize * sample_size];
        let bits = params.data_format.sample_bits();
        self.areas = (0..params.num_channels)
            .map(|i| AudioArea {
                start: self.intermediate.as_mut_ptr(),
                first_bit: i * buffer_size * bits,
                step_bits: bits,
                index: i,
                max_index: params.num_channels - 1,
            })
            .collect();
        self.num_channels = params.num_channels;
        self.start_index = params.start_index;
        self.buffer_size = buffer_size;
        self.data_format = params.data_format;
    }

    /// Open the per-channel files for write and start recording.
    ///
    /// `buffer_size` is the largest frame count a single `process` call may
    /// carry, typically `period_size` of the tapped buffer.
    pub fn start_recording(
        &mut self,
        params: &ProbingParams,
        buffer_size: u32,
    ) -> Result<(), ProbeError> {
        self.check_start(params, MODE_RECORD)?;

        let spec = Self::wav_spec(params.data_format, params.sample_rate);
        let mut files = Vec::with_capacity(params.num_channels as usize);
        for ch in 0..params.num_channels {
            let name = format!("{}_ch{}.wav", params.name_prefix, ch);
            info!(target: LOG, "recording into {name}");
            match WavWriter::create(&name, spec) {
                Ok(writer) => files.push(ChannelFile::Writer(writer)),
                Err(e) => {
                    error!(target: LOG, "could not create {name}: {e}");
                    return Err(ProbeError::File(e));
                }
            }
        }

        self.files = files;
        self.setup_intermediate(params, buffer_size);
        self.frames_to_process = params.duration_s * params.sample_rate;
        self.mode.store(MODE_RECORD, Ordering::Relaxed);
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Open the per-channel files for read, verify their headers and start
    /// injecting. The duration is clamped to the shortest file.
    pub fn start_inject(
        &mut self,
        params: &ProbingParams,
        buffer_size: u32,
    ) -> Result<(), ProbeError> {
        self.check_start(params, MODE_INJECT)?;

        let mut frames_to_process = params.duration_s * params.sample_rate;
        let mut files = Vec::with_capacity(params.num_channels as usize);
        for ch in 0..params.num_channels {
            let name = format!("{}_ch{}.wav", params.name_prefix, ch);
            info!(target: LOG, "injecting from {name}");
            let reader = match WavReader::open(&name) {
                Ok(reader) => reader,
                Err(e) => {
                    error!(target: LOG, "could not open {name}: {e}");
                    return Err(ProbeError::File(e));
                }
            };
            Self::check_wav_header(reader.spec(), params)?;
            frames_to_process = frames_to_process.min(reader.duration());
            files.push(ChannelFile::Reader { reader, position: 0 });
        }

        self.files = files;
        self.setup_intermediate(params, buffer_size);
        self.frames_to_process = frames_to_process;
        self.mode.store(MODE_INJECT, Ordering::Relaxed);
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn check_wav_header(spec: WavSpec, params: &ProbingParams) -> Result<(), ProbeError> {
        if spec.channels != 1 {
            return Err(ProbeError::HeaderMismatch("file must be mono"));
        }
        if spec.sample_rate != params.sample_rate {
            return Err(ProbeError::HeaderMismatch("sample rate differs"));
        }
        let matches = match params.data_format {
            SampleFormat::Int16 => {
                spec.sample_format == WavSampleFormat::Int && spec.bits_per_sample == 16
            }
            SampleFormat::Int32 => {
                spec.sample_format == WavSampleFormat::Int && spec.bits_per_sample == 32
            }
            SampleFormat::Float32 => {
                spec.sample_format == WavSampleFormat::Float && spec.bits_per_sample == 32
            }
        };
        if !matches {
            return Err(ProbeError::HeaderMismatch("sample format differs"));
        }
        Ok(())
    }

    /// Record frames from, or inject frames into, the given transfer areas.
    ///
    /// Called from the transfer path with the same areas/offset the transfer
    /// itself uses. Returns `Finished` (and stops) once the configured frame
    /// budget has been consumed.
    pub fn process(
        &mut self,
        areas: &[AudioArea],
        offset: u32,
        num_frames: u32,
    ) -> Result<ProbeResult, ProbeError> {
        if !self.started.load(Ordering::Relaxed) {
            return Ok(ProbeResult::NoOp);
        }
        if num_frames > self.buffer_size {
            error!(
                target: LOG,
                "probe buffer holds {} frames, cannot process {num_frames} in one call",
                self.buffer_size
            );
            return Err(ProbeError::InvalidParam("frame count exceeds probing buffer"));
        }
        match self.mode.load(Ordering::Relaxed) {
            MODE_INJECT => self.inject_data(areas, offset, num_frames),
            MODE_RECORD => self.record_data(areas, offset, num_frames),
            _ => Ok(ProbeResult::NoOp),
        }
    }

    fn record_data(
        &mut self,
        areas: &[AudioArea],
        offset: u32,
        num_frames: u32,
    ) -> Result<ProbeResult, ProbeError> {
        copy_audio_area_buffers(
            &self.areas,
            self.data_format,
            0,
            self.num_channels,
            0,
            num_frames,
            areas,
            self.data_format,
            offset,
            self.num_channels,
            self.start_index,
            num_frames,
        );
        for ch in 0..self.num_channels {
            let base = ch as usize * self.buffer_size as usize * self.data_format.sample_size();
            let ChannelFile::Writer(writer) = &mut self.files[ch as usize] else {
                return Err(ProbeError::WrongMode);
            };
            write_channel(
                writer,
                &self.intermediate[base..],
                self.data_format,
                num_frames,
            )?;
        }
        self.frames_to_process = self.frames_to_process.saturating_sub(num_frames);
        if self.frames_to_process < num_frames {
            info!(target: LOG, "recording finished, stopping now");
            self.reset();
            return Ok(ProbeResult::Finished);
        }
        Ok(ProbeResult::Processed)
    }

    fn inject_data(
        &mut self,
        areas: &[AudioArea],
        offset: u32,
        num_frames: u32,
    ) -> Result<ProbeResult, ProbeError> {
        let mut min_read = num_frames;
        for ch in 0..self.num_channels {
            let base = ch as usize * self.buffer_size as usize * self.data_format.sample_size();
            let format = self.data_format;
            let ChannelFile::Reader { reader, position } = &mut self.files[ch as usize] else {
                return Err(ProbeError::WrongMode);
            };
            let read = read_channel(
                reader,
                &mut self.intermediate[base..],
                format,
                num_frames,
            )?;
            *position += read;
            min_read = min_read.min(read);
        }
        if min_read > 0 {
            copy_audio_area_buffers(
                areas,
                self.data_format,
                offset,
                self.num_channels,
                self.start_index,
                min_read,
                &self.areas,
                self.data_format,
                0,
                self.num_channels,
                0,
                min_read,
            );
        }
        self.frames_to_process = self.frames_to_process.saturating_sub(min_read);
        if min_read < num_frames || self.frames_to_process == 0 {
            info!(target: LOG, "inject finished, stopping now");
            self.reset();
            return Ok(ProbeResult::Finished);
        }
        Ok(ProbeResult::Processed)
    }

    /// Advance the read position of every inject file without transferring
    /// data. Used when the surrounding transfer path skipped frames.
    pub fn update_file_position(&mut self, num_frames: u32) {
        if !self.started.load(Ordering::Relaxed) {
            return;
        }
        for file in &mut self.files {
            if let ChannelFile::Reader { reader, position } = file {
                let target = *position + num_frames;
                if reader.seek(target).is_err() {
                    warn!(target: LOG, "seek beyond end of probe file");
                }
                *position = target;
            }
        }
        self.frames_to_process = self.frames_to_process.saturating_sub(num_frames);
        if self.frames_to_process == 0 {
            info!(target: LOG, "probing finished, stopping now");
            self.reset();
        }
    }

    /// Stop a running operation and release all files.
    pub fn stop(&mut self) {
        if self.started.load(Ordering::Relaxed) {
            self.reset();
        }
    }

    fn reset(&mut self) {
        for file in self.files.drain(..) {
            match file {
                ChannelFile::Writer(writer) => {
                    if let Err(e) = writer.finalize() {
                        error!(target: LOG, "could not finalize probe file: {e}");
                    }
                }
                ChannelFile::Reader { .. } => {}
            }
        }
        self.intermediate.clear();
        self.areas.clear();
        self.num_channels = 0;
        self.start_index = 0;
        self.buffer_size = 0;
        self.frames_to_process = 0;
        self.started.store(false, Ordering::Release);
        self.mode.store(MODE_IDLE, Ordering::Relaxed);
    }
}

fn write_channel(
    writer: &mut WavWriter<BufWriter<File>>,
    data: &[u8],
    format: SampleFormat,
    num_frames: u32,
) -> Result<(), ProbeError> {
    match format {
        SampleFormat::Int16 => {
            for i in 0..num_frames as usize {
                let v = i16::from_le_bytes([data[2 * i], data[2 * i + 1]]);
                writer.write_sample(v)?;
            }
        }
        SampleFormat::Int32 => {
            for i in 0..num_frames as usize {
                let b = &data[4 * i..4 * i + 4];
                writer.write_sample(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))?;
            }
        }
        SampleFormat::Float32 => {
            for i in 0..num_frames as usize {
                let b = &data[4 * i..4 * i + 4];
                writer.write_sample(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))?;
            }
        }
    }
    Ok(())
}

fn read_channel(
    reader: &mut WavReader<BufReader<File>>,
    data: &mut [u8],
    format: SampleFormat,
    num_frames: u32,
) -> Result<u32, ProbeError> {
    let mut read = 0u32;
    match format {
        SampleFormat::Int16 => {
            for sample in reader.samples::<i16>().take(num_frames as usize) {
                let v = sample?;
                data[2 * read as usize..2 * read as usize + 2].copy_from_slice(&v.to_le_bytes());
                read += 1;
            }
        }
        SampleFormat::Int32 => {
            for sample in reader.samples::<i32>().take(num_frames as usize) {
                let v = sample?;
                data[4 * read as usize..4 * read as usize + 4].copy_from_slice(&v.to_le_bytes());
                read += 1;
            }
        }
        SampleFormat::Float32 => {
            for sample in reader.samples::<f32>().take(num_frames as usize) {
                let v = sample?;
                data[4 * read as usize..4 * read as usize + 4].copy_from_slice(&v.to_le_bytes());
                read += 1;
            }
        }
    }
    Ok(read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::make_non_interleaved_areas;

    fn params(prefix: &str, inject: bool) -> ProbingParams {
        ProbingParams {
            name_prefix: prefix.to_string(),
            duration_s: 1,
            is_inject: inject,
            num_channels: 2,
            start_index: 0,
            sample_rate: 48,
            data_format: SampleFormat::Float32,
        }
    }

    #[test]
    fn record_then_inject_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("probe").to_string_lossy().into_owned();

        let frames = 48u32;
        let mut source: Vec<f32> = (0..frames as usize * 2)
            .map(|i| (i as f32) / 100.0)
            .collect();
        let areas = make_non_interleaved_areas(
            source.as_mut_ptr() as *mut u8,
            2,
            frames,
            SampleFormat::Float32,
        );

        let mut probe = DataProbe::new();
        probe.start_recording(&params(&prefix, false), 64).unwrap();
        assert!(probe.is_started());
        // One full second: the probe stops itself and reports Finished.
        let res = probe.process(&areas, 0, frames).unwrap();
        assert_eq!(res, ProbeResult::Finished);
        assert!(!probe.is_started());

        let mut sink: Vec<f32> = vec![0.0; frames as usize * 2];
        let sink_areas = make_non_interleaved_areas(
            sink.as_mut_ptr() as *mut u8,
            2,
            frames,
            SampleFormat::Float32,
        );
        let mut inject = DataProbe::new();
        inject.start_inject(&params(&prefix, true), 64).unwrap();
        let res = inject.process(&sink_areas, 0, frames).unwrap();
        assert_eq!(res, ProbeResult::Finished);
        assert_eq!(source, sink);
    }

    #[test]
    fn double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("probe").to_string_lossy().into_owned();
        let mut probe = DataProbe::new();
        probe.start_recording(&params(&prefix, false), 64).unwrap();
        assert!(matches!(
            probe.start_recording(&params(&prefix, false), 64),
            Err(ProbeError::AlreadyStarted)
        ));
        probe.stop();
        assert!(!probe.is_started());
    }

    #[test]
    fn inject_header_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("probe").to_string_lossy().into_owned();
        let mut probe = DataProbe::new();
        probe.start_recording(&params(&prefix, false), 64).unwrap();
        probe.stop();

        let mut bad = params(&prefix, true);
        bad.sample_rate = 96;
        let mut inject = DataProbe::new();
        assert!(matches!(
            inject.start_inject(&bad, 64),
            Err(ProbeError::HeaderMismatch(_))
        ));
    }
}
