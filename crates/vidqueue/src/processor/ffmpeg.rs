//! Processor backed by an installed `ffmpeg` binary.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;

use super::{ProcessedVideo, ProcessingRequest, VideoProcessor};
use crate::error::ProcessError;
use crate::job::{OutputFormat, ProcessingOptions};
use crate::progress::{ProcessingStage, ProgressReporter};

const ENHANCE_FILTER: &str = "unsharp=5:5:1.0:5:5:0.0,eq=contrast=1.1:brightness=0.05,hqdn3d=1.5:1.5:6:6";
const MUSIC_FILTER: &str =
    "[1:a]volume=0.3[music];[0:a][music]amix=inputs=2:duration=first[aout]";

/// Share of the overall percentage covered by the encode itself (50..95).
const ENCODE_START: f64 = 50.0;
const ENCODE_SPAN: f64 = 45.0;

/// One key/value pair emitted by `-progress pipe:1`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// Output timestamp reached so far, in microseconds.
    OutTime(u64),
    End,
    Other,
}

/// Parses a line of ffmpeg's machine-readable progress output.
pub fn parse_progress_line(line: &str) -> ProgressLine {
    let Some((key, value)) = line.trim().split_once('=') else {
        return ProgressLine::Other;
    };
    match key {
        // out_time_ms is microseconds too, despite the name.
        "out_time_us" | "out_time_ms" => value
            .parse()
            .map(ProgressLine::OutTime)
            .unwrap_or(ProgressLine::Other),
        "progress" if value == "end" => ProgressLine::End,
        _ => ProgressLine::Other,
    }
}

/// Maps encoded time onto the overall percentage and the stage it belongs to.
fn encode_progress(out_time_us: u64, options: &ProcessingOptions) -> (ProcessingStage, f64) {
    let total_us = f64::from(options.duration_seconds.max(1)) * 1_000_000.0;
    let fraction = (out_time_us as f64 / total_us).clamp(0.0, 1.0);
    let percent = ENCODE_START + fraction * ENCODE_SPAN;

    let stage = if options.background_music.is_some()
        && percent >= ProcessingStage::AddingMusic.weight()
    {
        ProcessingStage::AddingMusic
    } else if options.enhance && percent >= ProcessingStage::Enhancing.weight() {
        ProcessingStage::Enhancing
    } else {
        ProcessingStage::Processing
    };
    (stage, percent)
}

/// Runs `ffmpeg` as a subprocess for each job.
#[derive(Debug, Clone)]
pub struct FfmpegProcessor {
    binary: PathBuf,
    output_dir: PathBuf,
}

impl FfmpegProcessor {
    pub fn new(binary: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Builds the ffmpeg command line for one render.
    pub fn build_args(input: &Path, output: &Path, options: &ProcessingOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-loglevel", "error", "-nostats", "-progress", "pipe:1"]
            .iter()
            .map(OsString::from)
            .collect();

        if let Some(start) = options.start_time {
            args.push("-ss".into());
            args.push(start.to_string().into());
        }
        args.push("-i".into());
        args.push(input.into());
        if let Some(music) = &options.background_music {
            args.push("-i".into());
            args.push(music.into());
        }
        args.push("-t".into());
        args.push(options.duration_seconds.to_string().into());

        if options.enhance {
            args.push("-vf".into());
            args.push(ENHANCE_FILTER.into());
        }
        if options.background_music.is_some() {
            for arg in ["-filter_complex", MUSIC_FILTER, "-map", "0:v", "-map", "[aout]"] {
                args.push(arg.into());
            }
        }

        let preset = options.quality.preset();
        for arg in ["-b:v", preset.video_bitrate, "-b:a", preset.audio_bitrate] {
            args.push(arg.into());
        }

        match options.output_format {
            OutputFormat::Mp4 | OutputFormat::Mov => {
                for arg in [
                    "-c:v",
                    "libx264",
                    "-preset",
                    preset.preset,
                    "-c:a",
                    "aac",
                    "-movflags",
                    "+faststart",
                ] {
                    args.push(arg.into());
                }
            }
            OutputFormat::Webm => {
                for arg in ["-c:v", "libvpx-vp9", "-c:a", "libopus"] {
                    args.push(arg.into());
                }
            }
        }

        args.push("-f".into());
        args.push(options.output_format.extension().into());
        args.push(output.into());
        args
    }

    fn output_path(&self, format: OutputFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", uuid::Uuid::new_v4(), format.extension()))
    }
}

#[async_trait]
impl VideoProcessor for FfmpegProcessor {
    async fn process(
        &self,
        request: &ProcessingRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<ProcessedVideo, ProcessError> {
        let options = &request.options;
        progress.stage(ProcessingStage::Initializing);

        if tokio::fs::metadata(&request.input_path).await.is_err() {
            return Err(ProcessError::InputMissing(request.input_path.clone()));
        }
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ProcessError::OutputDirectory {
                path: self.output_dir.clone(),
                source: e,
            })?;

        progress.stage(ProcessingStage::Analyzing);
        if options.captions {
            log::warn!(
                "Captions requested for job {} but caption generation is not available",
                request.job_id
            );
        }

        let output = self.output_path(options.output_format);
        let args = Self::build_args(&request.input_path, &output, options);
        log::debug!("Running {} with {} arguments", self.binary.display(), args.len());

        let mut child = TokioCommand::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ProcessError::Spawn)?;

        // Drain stderr alongside stdout so a chatty encoder cannot block on a full pipe.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        progress.stage(ProcessingStage::Processing);
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_progress_line(&line) {
                    ProgressLine::OutTime(us) => {
                        let (stage, percent) = encode_progress(us, options);
                        progress.report(stage, percent, stage.message());
                    }
                    ProgressLine::End => break,
                    ProgressLine::Other => {}
                }
            }
        }

        let status = child.wait().await.map_err(ProcessError::Spawn)?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            return Err(ProcessError::Ffmpeg {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        progress.stage(ProcessingStage::Finalizing);
        let metadata = tokio::fs::metadata(&output)
            .await
            .map_err(|e| ProcessError::Output {
                path: output.clone(),
                source: e,
            })?;

        Ok(ProcessedVideo {
            output_path: output,
            duration_seconds: options.duration_seconds,
            size_bytes: metadata.len(),
        })
    }
}
