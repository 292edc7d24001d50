//! Wait for a submitted job and bring its output into the request's
//! work directory.
//!
//! ComfyUI's history endpoint is polled at a fixed interval. An absent
//! entry means the prompt is still queued or running. HTTP failures while
//! polling are logged and polling carries on until the deadline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mediabot_comfyui::backend::GenerationBackend;
use mediabot_comfyui::history::{job_state, JobState, OutputFile};
use tokio::time::Instant;

use crate::error::PipelineError;
use crate::job::{Job, JobStatus};

/// Default delay between history lookups.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct JobPoller {
    backend: Arc<dyn GenerationBackend>,
    output_dir: PathBuf,
    interval: Duration,
}

impl JobPoller {
    /// `output_dir` is ComfyUI's output folder as seen from this host.
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        output_dir: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self {
            backend,
            output_dir: output_dir.into(),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until `job` reaches a terminal state or `timeout` elapses.
    ///
    /// On success the first output file (videos before images) is moved
    /// into `dest_dir` and its new path is returned and recorded on the job.
    pub async fn await_completion(
        &self,
        job: &mut Job,
        timeout: Duration,
        dest_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                job.finish(JobStatus::TimedOut);
                tracing::warn!(
                    job_id = %job.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job timed out",
                );
                return Err(PipelineError::Timeout {
                    segment: None,
                    job_id: job.id.clone(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            match tokio::time::timeout(remaining, self.backend.history(&job.id)).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    tracing::warn!(job_id = %job.id, error = %e, "History lookup failed, retrying");
                }
                Ok(Ok(entry)) => match job_state(entry.as_ref()) {
                    JobState::Pending => {
                        if job.status == JobStatus::Queued {
                            job.status = JobStatus::Running;
                        }
                        tracing::debug!(
                            job_id = %job.id,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Job still pending",
                        );
                    }
                    JobState::Failed(message) => {
                        job.finish(JobStatus::Failed);
                        tracing::error!(job_id = %job.id, error = %message, "Job failed");
                        return Err(PipelineError::Generation {
                            segment: None,
                            job_id: job.id.clone(),
                            message,
                        });
                    }
                    JobState::Succeeded(files) => {
                        let path = self.retrieve(job, &files, dest_dir).await?;
                        job.result_path = Some(path.clone());
                        job.finish(JobStatus::Succeeded);
                        tracing::info!(
                            job_id = %job.id,
                            path = %path.display(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Job completed",
                        );
                        return Ok(path);
                    }
                },
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.interval.min(remaining)).await;
        }
    }

    /// Move the first output into `dest_dir`, downloading it through the
    /// API when it is not on a shared filesystem.
    async fn retrieve(
        &self,
        job: &mut Job,
        files: &[OutputFile],
        dest_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let Some(file) = files.first() else {
            job.finish(JobStatus::Failed);
            return Err(PipelineError::Generation {
                segment: None,
                job_id: job.id.clone(),
                message: "Prompt finished without producing any output files".into(),
            });
        };

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(&file.filename);
        let local = file.local_path(&self.output_dir);

        if tokio::fs::try_exists(&local).await.unwrap_or(false) {
            move_file(&local, &dest).await?;
            return Ok(dest);
        }

        tracing::debug!(
            job_id = %job.id,
            filename = %file.filename,
            "Output not on local disk, downloading",
        );
        match self.backend.download(file).await {
            Ok(bytes) => {
                tokio::fs::write(&dest, bytes).await?;
                Ok(dest)
            }
            Err(e) => {
                job.finish(JobStatus::Failed);
                Err(PipelineError::Generation {
                    segment: None,
                    job_id: job.id.clone(),
                    message: format!("Failed to download output {}: {e}", file.filename),
                })
            }
        }
    }
}

/// Rename, falling back to copy + delete across filesystems.
pub(crate) async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use mediabot_comfyui::api::ComfyUIApiError;
    use mediabot_comfyui::history::HistoryEntry;
    use serde_json::{json, Value};

    use super::*;

    /// Replays a scripted sequence of history answers; the last one repeats.
    struct ScriptedBackend {
        answers: Mutex<VecDeque<Result<Option<Value>, u16>>>,
        downloads: Mutex<usize>,
    }

    impl ScriptedBackend {
        fn new(answers: Vec<Result<Option<Value>, u16>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                downloads: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn submit(&self, _: &Value) -> Result<String, ComfyUIApiError> {
            Ok("unused".into())
        }

        async fn history(&self, _: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
            let mut answers = self.answers.lock().unwrap();
            let answer = if answers.len() > 1 {
                answers.pop_front().unwrap()
            } else {
                answers.front().cloned().unwrap()
            };
            match answer {
                Ok(Some(v)) => Ok(Some(serde_json::from_value(v)?)),
                Ok(None) => Ok(None),
                Err(status) => Err(ComfyUIApiError::ApiError {
                    status,
                    body: "busy".into(),
                }),
            }
        }

        async fn download(&self, file: &OutputFile) -> Result<Vec<u8>, ComfyUIApiError> {
            *self.downloads.lock().unwrap() += 1;
            Ok(format!("remote:{}", file.filename).into_bytes())
        }
    }

    fn success(filename: &str) -> Value {
        json!({
            "status": {"status_str": "success", "completed": true, "messages": []},
            "outputs": {"9": {"gifs": [{"filename": filename, "subfolder": "", "type": "output"}]}}
        })
    }

    fn poller(backend: Arc<ScriptedBackend>, output_dir: &Path) -> JobPoller {
        JobPoller::new(backend, output_dir, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn moves_local_output_into_dest() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("out");
        std::fs::create_dir_all(&output_dir).unwrap();
        std::fs::write(output_dir.join("seg_00001.mp4"), b"video").unwrap();

        let backend = ScriptedBackend::new(vec![Ok(None), Ok(Some(success("seg_00001.mp4")))]);
        let mut job = Job::queued("p-1", None);
        let dest_dir = dir.path().join("req");

        let path = poller(backend.clone(), &output_dir)
            .await_completion(&mut job, Duration::from_secs(5), &dest_dir)
            .await
            .unwrap();

        assert_eq!(path, dest_dir.join("seg_00001.mp4"));
        assert_eq!(std::fs::read(&path).unwrap(), b"video");
        assert!(!output_dir.join("seg_00001.mp4").exists());
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result_path.as_deref(), Some(path.as_path()));
        assert_eq!(*backend.downloads.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn downloads_when_not_local() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![Ok(Some(success("remote.mp4")))]);
        let mut job = Job::queued("p-2", None);

        let path = poller(backend.clone(), &dir.path().join("missing"))
            .await_completion(&mut job, Duration::from_secs(5), dir.path())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"remote:remote.mp4");
        assert_eq!(*backend.downloads.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn error_status_is_generation_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![Ok(Some(json!({
            "status": {"status_str": "error", "completed": false, "messages": [
                ["execution_error", {"node_id": "50", "node_type": "WanImageToVideo", "exception_message": "CUDA out of memory"}]
            ]},
            "outputs": {}
        })))]);
        let mut job = Job::queued("p-3", None);

        let err = poller(backend, dir.path())
            .await_completion(&mut job, Duration::from_secs(5), dir.path())
            .await
            .unwrap_err();

        assert_matches!(err, PipelineError::Generation { ref message, .. } if message.contains("CUDA out of memory"));
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result_path.is_none());
    }

    #[tokio::test]
    async fn transient_errors_do_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.mp4"), b"v").unwrap();
        let backend = ScriptedBackend::new(vec![
            Err(502),
            Err(502),
            Ok(None),
            Ok(Some(success("ok.mp4"))),
        ]);
        let mut job = Job::queued("p-4", None);

        let path = poller(backend, dir.path())
            .await_completion(&mut job, Duration::from_secs(5), &dir.path().join("req"))
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn times_out_without_result() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![Ok(None)]);
        let mut job = Job::queued("p-5", None);

        let err = poller(backend, dir.path())
            .await_completion(&mut job, Duration::from_millis(40), dir.path())
            .await
            .unwrap_err();

        assert_matches!(err, PipelineError::Timeout { ref job_id, .. } if job_id == "p-5");
        assert_eq!(job.status, JobStatus::TimedOut);
        assert!(job.result_path.is_none());
    }
}
