use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use super::{TranscodeJob, Transcoder};
use crate::config::ToolsConfig;
use crate::platforms::ArtifactKind;
use crate::process::{ProcessError, ProcessRunner, ProcessSpec};

/// Transcoder backed by the ffmpeg binary
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    runner: ProcessRunner,
    timeout: Duration,
    audio_bitrate: String,
    max_video_height: u32,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: PathBuf, runner: ProcessRunner, tools: &ToolsConfig) -> Self {
        Self {
            ffmpeg_path,
            runner,
            timeout: tools.transcode_timeout(),
            audio_bitrate: tools.audio_bitrate.clone(),
            max_video_height: tools.max_video_height,
        }
    }

    pub fn ffmpeg_path(&self) -> &PathBuf {
        &self.ffmpeg_path
    }

    pub fn build_args(&self, job: &TranscodeJob) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            job.input.to_string_lossy().into_owned(),
        ];

        match job.kind {
            ArtifactKind::Audio => args.extend([
                "-vn".into(),
                "-acodec".into(),
                "libmp3lame".into(),
                "-b:a".into(),
                self.audio_bitrate.clone(),
            ]),
            ArtifactKind::Video => args.extend([
                "-vf".into(),
                // Never upscale; keep width even for H.264
                format!("scale=-2:'min({},ih)'", self.max_video_height),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "veryfast".into(),
                "-crf".into(),
                "23".into(),
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                "128k".into(),
                "-movflags".into(),
                "+faststart".into(),
            ]),
        }

        args.push(job.output.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, job: &TranscodeJob) -> Result<(), ProcessError> {
        tracing::debug!(
            input = %job.input.display(),
            output = %job.output.display(),
            kind = %job.kind,
            "Transcoding with ffmpeg"
        );

        let spec = ProcessSpec::new(&self.ffmpeg_path, self.timeout).args(self.build_args(job));
        self.runner.run(&spec).await?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
