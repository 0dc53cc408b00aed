//! Server-side recording.
//!
//! Recording taps a producer through a plain relay transport and pipes the
//! RTP into an external ffmpeg process that writes the file. The media path
//! stays inside the engine; this module only manages the relay handles and
//! the child process.
//!
//! Recording is best-effort throughout: a failure to start or stop a
//! recording never takes the room down.

use crate::errors::CoordError;

use media_engine::{Consumer, MediaKind, PlainTransport, Router};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Spawns and tracks recording processes.
#[derive(Debug, Clone)]
pub struct RecordingController {
    ffmpeg_path: String,
    output_dir: PathBuf,
}

impl RecordingController {
    /// Build a controller writing files under `output_dir`.
    #[must_use]
    pub fn new(ffmpeg_path: String, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path,
            output_dir: output_dir.into(),
        }
    }

    /// Start recording one producer.
    ///
    /// Creates a plain relay transport on the room's router, consumes the
    /// producer unpaused, and spawns the recording process against the
    /// relay tuple.
    pub async fn start_for_producer(
        &self,
        router: &Router,
        producer_id: &str,
    ) -> Result<RecordingSession, CoordError> {
        let transport = router
            .create_plain_transport()
            .await
            .map_err(|e| CoordError::RecordingFailed(e.to_string()))?;

        let consumer = match transport
            .consume(producer_id, &router.rtp_capabilities(), false)
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                transport.close().await;
                return Err(CoordError::RecordingFailed(e.to_string()));
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            consumer.close();
            transport.close().await;
            return Err(CoordError::RecordingFailed(format!("output dir: {e}")));
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let file_path = self
            .output_dir
            .join(format!("record_{producer_id}_{timestamp}.mkv"));
        let file = file_path.to_string_lossy().to_string();

        let (ip, port) = transport.tuple();
        let args = ffmpeg_args(consumer.kind(), &ip, port, &file);

        let spawn_result = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut process = match spawn_result {
            Ok(process) => process,
            Err(e) => {
                consumer.close();
                transport.close().await;
                return Err(CoordError::RecordingFailed(format!(
                    "spawn {}: {e}",
                    self.ffmpeg_path
                )));
            }
        };

        if let Some(stderr) = process.stderr.take() {
            let log_producer_id = producer_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(
                        target: "coord.recording",
                        producer_id = %log_producer_id,
                        "[ffmpeg] {line}"
                    );
                }
            });
        }

        info!(
            target: "coord.recording",
            producer_id = %producer_id,
            file = %file,
            relay_port = port,
            "Recording started"
        );

        Ok(RecordingSession {
            producer_id: producer_id.to_string(),
            file,
            transport,
            consumer,
            process,
        })
    }
}

/// Input/output arguments for one recording process.
fn ffmpeg_args(kind: MediaKind, ip: &str, port: u16, file: &str) -> Vec<String> {
    let (input_format, codec_flag) = match kind {
        MediaKind::Audio => ("opus", "-c:a"),
        MediaKind::Video => ("vp8", "-c:v"),
    };
    vec![
        "-f".to_string(),
        input_format.to_string(),
        "-i".to_string(),
        format!("udp://{ip}:{port}"),
        codec_flag.to_string(),
        "copy".to_string(),
        file.to_string(),
    ]
}

/// One active recording: relay handles plus the child process.
#[derive(Debug)]
pub struct RecordingSession {
    producer_id: String,
    file: String,
    transport: PlainTransport,
    consumer: Consumer,
    process: Child,
}

impl RecordingSession {
    /// Producer being recorded.
    #[must_use]
    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    /// Output file path.
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Stop the recording. Best-effort: failures are logged, never
    /// propagated.
    pub async fn stop(mut self) {
        self.consumer.close();
        self.transport.close().await;

        if let Err(e) = self.process.start_kill() {
            warn!(
                target: "coord.recording",
                producer_id = %self.producer_id,
                error = %e,
                "Failed to signal recording process"
            );
        }

        info!(
            target: "coord.recording",
            producer_id = %self.producer_id,
            file = %self.file,
            "Recording stopped"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use media_engine::{EngineSettings, TransportDirection, Worker};

    async fn room_with_producer() -> (Router, String) {
        let worker = Worker::launch(0, EngineSettings::default());
        let router = worker.create_router().await.unwrap();

        let transport = router
            .create_webrtc_transport(TransportDirection::Send)
            .await
            .unwrap();
        transport
            .connect(serde_json::json!({"role": "client"}))
            .await
            .unwrap();
        let producer = transport
            .produce(MediaKind::Audio, serde_json::json!({"codecs": []}))
            .await
            .unwrap();

        (router, producer.id().to_string())
    }

    #[tokio::test]
    async fn test_start_and_stop_recording() {
        let (router, producer_id) = room_with_producer().await;
        // Any spawnable binary stands in for ffmpeg here
        let controller = RecordingController::new("sh".to_string(), std::env::temp_dir());

        let session = controller
            .start_for_producer(&router, &producer_id)
            .await
            .expect("recording should start");

        assert_eq!(session.producer_id(), producer_id);
        assert!(session.file().contains(&format!("record_{producer_id}_")));
        assert!(session.file().ends_with(".mkv"));

        session.stop().await;
    }

    #[tokio::test]
    async fn test_missing_binary_reports_best_effort_failure() {
        let (router, producer_id) = room_with_producer().await;
        let controller = RecordingController::new(
            "/nonexistent/ffmpeg".to_string(),
            std::env::temp_dir(),
        );

        let result = controller.start_for_producer(&router, &producer_id).await;
        let err = result.expect_err("spawn should fail");
        assert!(matches!(err, CoordError::RecordingFailed(_)));
        assert_eq!(err.error_code(), 8);
    }

    #[tokio::test]
    async fn test_unknown_producer_fails_before_spawn() {
        let worker = Worker::launch(0, EngineSettings::default());
        let router = worker.create_router().await.unwrap();
        let controller = RecordingController::new("sh".to_string(), std::env::temp_dir());

        let result = controller.start_for_producer(&router, "producer-missing").await;
        assert!(matches!(result, Err(CoordError::RecordingFailed(_))));
    }
}
