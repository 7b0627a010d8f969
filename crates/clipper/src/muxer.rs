//! Muxer Pipeline: stream ordered payloads into an external muxing stage.
//!
//! The muxer itself is a [`MuxerBackend`]: something that can be started for
//! an output path, accepts raw bytes on an input stream and eventually
//! reports success or failure. [`ProcessMuxer`] drives an ffmpeg-style
//! subprocess; tests substitute in-memory backends.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use process_utils::{describe_exit, piped_input_command, tail_lines};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::MuxerConfig;
use crate::error::ClipError;

/// Placeholder replaced by the output path in [`ProcessMuxer`] arguments.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Lines of stderr kept when a muxer process fails.
const STDERR_TAIL_LINES: usize = 20;

/// A running muxer: feed `input`, close it, then await `completion`.
pub struct MuxerSession {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub completion: BoxFuture<'static, Result<(), ClipError>>,
}

#[async_trait]
pub trait MuxerBackend: Send + Sync {
    /// Start muxing into `output_path`.
    async fn start(&self, output_path: &Path) -> Result<MuxerSession, ClipError>;
}

/// Runs an external program that reads the stream from stdin and writes the
/// container file itself.
#[derive(Debug, Clone)]
pub struct ProcessMuxer {
    program: String,
    args: Vec<String>,
}

impl ProcessMuxer {
    /// `args` may contain [`OUTPUT_PLACEHOLDER`], substituted on every start.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// ffmpeg reading from stdin and stream-copying every track.
    pub fn ffmpeg(config: &MuxerConfig) -> Self {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];
        args.extend(config.input_args.iter().cloned());
        if let Some(format) = &config.input_format {
            args.extend(["-f".to_string(), format.clone()]);
        }
        args.extend(
            ["-i", "-", "-c:v", "copy", "-c:a", "copy", "-c:s", "copy"]
                .into_iter()
                .map(String::from),
        );
        args.extend(config.output_args.iter().cloned());
        args.extend([
            "-f".to_string(),
            config.output_format.clone(),
            OUTPUT_PLACEHOLDER.to_string(),
        ]);

        Self::new(config.binary_path.clone(), args)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn args_for(&self, output_path: &Path) -> Vec<String> {
        let output = output_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
            .collect()
    }
}

#[async_trait]
impl MuxerBackend for ProcessMuxer {
    async fn start(&self, output_path: &Path) -> Result<MuxerSession, ClipError> {
        let args = self.args_for(output_path);
        debug!(program = %self.program, ?args, "Starting muxer process");

        let mut child = piped_input_command(&self.program)
            .args(&args)
            .spawn()
            .map_err(|e| ClipError::process(format!("failed to spawn {}: {e}", self.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClipError::process("muxer stdin was not captured"))?;

        let program = self.program.clone();
        let completion = async move {
            let output = child
                .wait_with_output()
                .await
                .map_err(|e| ClipError::process(format!("failed to wait for {program}: {e}")))?;

            if output.status.success() {
                debug!(program = %program, "Muxer process finished");
                return Ok(());
            }

            let stderr = tail_lines(&output.stderr, STDERR_TAIL_LINES);
            let status = describe_exit(&output.status);
            Err(ClipError::process(if stderr.is_empty() {
                format!("{program} {status}")
            } else {
                format!("{program} {status}: {stderr}")
            }))
        }
        .boxed();

        Ok(MuxerSession {
            input: Box::new(stdin),
            completion,
        })
    }
}

/// Writes ordered payloads through a [`MuxerBackend`] into
/// `{save_dir}/{clip_id}.{format}`.
pub struct MuxerPipeline {
    backend: Arc<dyn MuxerBackend>,
    output_format: String,
}

impl MuxerPipeline {
    pub fn new(backend: Arc<dyn MuxerBackend>, output_format: impl Into<String>) -> Self {
        Self {
            backend,
            output_format: output_format.into(),
        }
    }

    pub fn output_path(&self, save_dir: &Path, clip_id: &str) -> PathBuf {
        save_dir.join(format!("{clip_id}.{}", self.output_format))
    }

    /// Assemble the clip. The init segment, when present, goes first.
    ///
    /// Failures are final: a partially written output file is removed and
    /// the error returned. A file that was already at the output path before
    /// this run is never removed. A muxer failure is reported in preference
    /// to the broken pipe it usually causes on the writer side.
    pub async fn assemble(
        &self,
        save_dir: &Path,
        clip_id: &str,
        init_segment: Option<Bytes>,
        payloads: Vec<Bytes>,
    ) -> Result<PathBuf, ClipError> {
        tokio::fs::create_dir_all(save_dir).await?;
        let output_path = self.output_path(save_dir, clip_id);
        let preexisting = tokio::fs::try_exists(&output_path).await.unwrap_or(true);

        match self.run(&output_path, init_segment, payloads).await {
            Ok(written) => {
                info!(path = %output_path.display(), bytes = written, "Clip assembled");
                Ok(output_path)
            }
            Err(e) => {
                warn!(path = %output_path.display(), error = %e, "Muxing failed");
                if preexisting {
                    warn!(
                        path = %output_path.display(),
                        "Output existed before muxing, leaving it in place"
                    );
                } else {
                    remove_partial_output(&output_path).await;
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        output_path: &Path,
        init_segment: Option<Bytes>,
        payloads: Vec<Bytes>,
    ) -> Result<u64, ClipError> {
        let MuxerSession { input, completion } = self.backend.start(output_path).await?;

        let writer = tokio::spawn(write_input(input, init_segment, payloads));
        let (written, completed) = tokio::join!(writer, completion);

        completed?;
        match written {
            Ok(Ok(written)) => Ok(written),
            Ok(Err(e)) => Err(ClipError::process(format!(
                "failed writing to muxer input: {e}"
            ))),
            Err(e) => Err(ClipError::Internal {
                reason: format!("muxer writer task failed: {e}"),
            }),
        }
    }
}

async fn write_input(
    mut input: Box<dyn AsyncWrite + Send + Unpin>,
    init_segment: Option<Bytes>,
    payloads: Vec<Bytes>,
) -> io::Result<u64> {
    let mut written = 0u64;
    for chunk in init_segment.iter().chain(payloads.iter()) {
        input.write_all(chunk).await?;
        written += chunk.len() as u64;
    }
    input.flush().await?;
    input.shutdown().await?;
    Ok(written)
}

async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingMuxer;

    fn payloads(parts: &[&'static str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect()
    }

    #[test]
    fn ffmpeg_arguments() {
        let config = MuxerConfig {
            input_format: Some("mpegts".to_string()),
            output_args: vec!["-movflags".to_string(), "+faststart".to_string()],
            ..MuxerConfig::default()
        };
        let muxer = ProcessMuxer::ffmpeg(&config);

        assert_eq!(muxer.program(), "ffmpeg");
        assert_eq!(
            muxer.args_for(Path::new("/clips/chan1/1700000000.mp4")),
            vec![
                "-hide_banner",
                "-y",
                "-f",
                "mpegts",
                "-i",
                "-",
                "-c:v",
                "copy",
                "-c:a",
                "copy",
                "-c:s",
                "copy",
                "-movflags",
                "+faststart",
                "-f",
                "mp4",
                "/clips/chan1/1700000000.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn writes_init_then_payloads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingMuxer::new();
        let pipeline = MuxerPipeline::new(backend.clone(), "mp4");
        let save_dir = dir.path().join("chan1");

        let path = pipeline
            .assemble(
                &save_dir,
                "1700000000",
                Some(Bytes::from_static(b"INIT|")),
                payloads(&["a|", "b|", "c"]),
            )
            .await
            .unwrap();

        assert_eq!(path, save_dir.join("1700000000.mp4"));
        let records = backend.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].input, b"INIT|a|b|c");
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"INIT|a|b|c");
    }

    #[tokio::test]
    async fn failed_muxer_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingMuxer::failing("exited with code 1");
        let pipeline = MuxerPipeline::new(backend.clone(), "mp4");

        let err = pipeline
            .assemble(dir.path(), "42", None, payloads(&["x", "y"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ClipError::Process { .. }));
        assert_eq!(backend.records()[0].input, b"xy");
        assert!(!dir.path().join("42.mp4").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_muxer_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let muxer = ProcessMuxer::new(
            "sh",
            vec![
                "-c".to_string(),
                "cat > \"$0\"".to_string(),
                OUTPUT_PLACEHOLDER.to_string(),
            ],
        );
        let pipeline = MuxerPipeline::new(Arc::new(muxer), "ts");

        let path = pipeline
            .assemble(dir.path(), "clip", None, payloads(&["one", "two"]))
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"onetwo");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_muxer_reports_exit_status_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let muxer = ProcessMuxer::new(
            "sh",
            vec![
                "-c".to_string(),
                "cat >/dev/null; echo 'Invalid data found' >&2; exit 1".to_string(),
            ],
        );
        let pipeline = MuxerPipeline::new(Arc::new(muxer), "mp4");

        let err = pipeline
            .assemble(dir.path(), "clip", None, payloads(&["junk"]))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("exited with code 1"), "{message}");
        assert!(message.contains("Invalid data found"), "{message}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_muxer_closing_input_early_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        // exits successfully without reading anything
        let muxer = ProcessMuxer::new(
            "sh",
            vec![
                "-c".to_string(),
                "exec 0<&-; sleep 0.2; exit 0".to_string(),
            ],
        );
        let pipeline = MuxerPipeline::new(Arc::new(muxer), "mp4");
        let large = vec![Bytes::from(vec![0u8; 4 * 1024 * 1024])];

        let err = pipeline
            .assemble(dir.path(), "clip", None, large)
            .await
            .unwrap_err();

        assert!(matches!(err, ClipError::Process { .. }), "{err}");
        assert!(
            err.to_string().contains("failed writing to muxer input"),
            "{err}"
        );
        assert!(!dir.path().join("clip.mp4").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_muxer_keeps_file_it_did_not_create() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("1700000000.mp4");
        tokio::fs::write(&existing, b"earlier clip").await.unwrap();
        let muxer = ProcessMuxer::new(
            "sh",
            vec!["-c".to_string(), "cat >/dev/null; exit 1".to_string()],
        );
        let pipeline = MuxerPipeline::new(Arc::new(muxer), "mp4");

        let err = pipeline
            .assemble(dir.path(), "1700000000", None, payloads(&["late"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ClipError::Process { .. }));
        assert_eq!(tokio::fs::read(&existing).await.unwrap(), b"earlier clip");
    }

    #[tokio::test]
    async fn missing_binary_is_a_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let muxer = ProcessMuxer::new("definitely-not-a-real-muxer-binary", Vec::new());
        let pipeline = MuxerPipeline::new(Arc::new(muxer), "mp4");

        let err = pipeline
            .assemble(dir.path(), "clip", None, payloads(&["x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClipError::Process { .. }));
    }
}
