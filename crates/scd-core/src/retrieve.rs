//! Retrieval orchestrator: one job from page URL to persisted artifact.
//!
//! resolving-manifest -> fetching-segments -> assembling -> persisted, with
//! `RetrievalError` as the failure exit of every state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use crate::assembly::{self, Reassembler};
use crate::batch::{self, BatchReport};
use crate::config::ScdConfig;
use crate::error::RetrievalError;
use crate::extract;
use crate::fetch::{self, SegmentFetcher};
use crate::job::{JobId, JobState, RetrievalJob};
use crate::matcher::{ManifestHandle, ManifestMatcher, ManifestPattern};
use crate::page::{HijackHandle, PageError, PageLauncher, PageSession};
use crate::progress::Progress;
use crate::storage::{self, ArtifactSink};

#[derive(Debug, Clone)]
pub struct RetrieveSettings {
    pub pattern: ManifestPattern,
    pub manifest_timeout: Duration,
}

impl RetrieveSettings {
    pub fn from_config(cfg: &ScdConfig) -> Self {
        Self {
            pattern: ManifestPattern::from_config(cfg),
            manifest_timeout: cfg.manifest_timeout(),
        }
    }
}

impl Default for RetrieveSettings {
    fn default() -> Self {
        Self::from_config(&ScdConfig::default())
    }
}

/// What a successful job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalReport {
    pub job: JobId,
    pub manifest_url: String,
    pub segment_count: usize,
    pub bytes: usize,
    pub path: PathBuf,
    /// SHA-256 of the persisted artifact, lowercase hex.
    pub sha256: String,
}

pub struct Retriever<L, F, S> {
    launcher: Arc<L>,
    fetcher: Arc<F>,
    sink: Arc<S>,
    settings: RetrieveSettings,
    progress: Progress,
}

impl<L, F, S> Retriever<L, F, S>
where
    L: PageLauncher,
    F: SegmentFetcher,
    S: ArtifactSink,
{
    pub fn new(launcher: L, fetcher: F, sink: S, settings: RetrieveSettings) -> Self {
        Self {
            launcher: Arc::new(launcher),
            fetcher: Arc::new(fetcher),
            sink: Arc::new(sink),
            settings,
            progress: Progress::none(),
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &RetrieveSettings {
        &self.settings
    }

    /// Run one job to a terminal state.
    pub async fn retrieve(&self, job: &RetrievalJob) -> Result<RetrievalReport, RetrievalError> {
        let span = tracing::info_span!("retrieve", job = job.id, page = %job.page_url);
        let result = self.run(job).instrument(span).await;
        match &result {
            Ok(report) => {
                tracing::info!(
                    job = job.id,
                    path = %report.path.display(),
                    segments = report.segment_count,
                    bytes = report.bytes,
                    "retrieval complete"
                );
                self.progress.job_state(job.id, JobState::Persisted);
            }
            Err(e) => {
                tracing::warn!(job = job.id, retryable = e.is_retryable(), "retrieval failed: {e}");
                self.progress.job_state(job.id, JobState::Failed);
            }
        }
        self.progress.job_finished(job.id, result.is_ok());
        result
    }

    /// Run `jobs` in batches of `batch_size` with a barrier between batches.
    pub async fn retrieve_all(
        self: &Arc<Self>,
        jobs: Vec<RetrievalJob>,
        batch_size: usize,
    ) -> BatchReport<RetrievalReport, RetrievalError> {
        batch::run_batches(jobs, batch_size, |job| {
            let this = Arc::clone(self);
            async move { this.retrieve(&job).await }
        })
        .await
    }

    async fn run(&self, job: &RetrievalJob) -> Result<RetrievalReport, RetrievalError> {
        self.progress.job_state(job.id, JobState::ResolvingManifest);
        let (manifest, navigation) = self.resolve_manifest(job).await?;
        let result = self.fetch_and_persist(job, &manifest).await;
        navigation.settle(self.settings.manifest_timeout).await;
        result
    }

    async fn resolve_manifest(
        &self,
        job: &RetrievalJob,
    ) -> Result<(ManifestHandle, Navigation<L::Session>), RetrievalError> {
        let launcher = Arc::clone(&self.launcher);
        let mut session = tokio::task::spawn_blocking(move || launcher.launch()).await??;
        let (hijack, stream) = session.hijack()?;
        let mut hijack = HijackGuard::new(hijack);

        // The observer task owns the matcher, so the signal resolves to `None`
        // once the exchange stream closes without a match.
        let (matcher, mut signal) = ManifestMatcher::new(self.settings.pattern.clone());
        let mut observer = JoinSet::new();
        observer.spawn(async move { matcher.watch(stream).await });

        let page_url = job.page_url.clone();
        let mut navigation = tokio::task::spawn_blocking(move || {
            let result = session.navigate(&page_url);
            (session, result)
        });

        let deadline = tokio::time::sleep(self.settings.manifest_timeout);
        tokio::pin!(deadline);
        let mut joined_navigation = false;
        let mut settled: Option<L::Session> = None;

        let outcome = loop {
            tokio::select! {
                biased;
                manifest = &mut signal => {
                    break manifest.ok_or_else(|| RetrievalError::ManifestNotFound {
                        page_url: job.page_url.clone(),
                    });
                }
                joined = &mut navigation, if !joined_navigation => {
                    joined_navigation = true;
                    match joined {
                        Ok((session, Ok(()))) => {
                            tracing::debug!(
                                job = job.id,
                                "page settled, still waiting for manifest"
                            );
                            settled = Some(session);
                        }
                        Ok((_, Err(e))) => break Err(RetrievalError::Page(e)),
                        Err(e) => break Err(e.into()),
                    }
                }
                _ = &mut deadline => {
                    break Err(RetrievalError::ManifestTimeout {
                        page_url: job.page_url.clone(),
                        timeout: self.settings.manifest_timeout,
                    });
                }
            }
        };

        hijack.stop();
        observer.abort_all();

        let navigation = if joined_navigation {
            Navigation::Settled(settled)
        } else {
            Navigation::Running(navigation)
        };
        match outcome {
            Ok(manifest) => Ok((manifest, navigation)),
            Err(e) => {
                navigation.settle(self.settings.manifest_timeout).await;
                Err(e)
            }
        }
    }

    async fn fetch_and_persist(
        &self,
        job: &RetrievalJob,
        manifest: &ManifestHandle,
    ) -> Result<RetrievalReport, RetrievalError> {
        self.progress.job_state(job.id, JobState::FetchingSegments);
        let segments = extract::extract(&manifest.text())?;
        if segments.is_empty() {
            return Err(RetrievalError::EmptyManifest {
                manifest_url: manifest.url().to_string(),
            });
        }
        let segment_count = segments.len();
        tracing::info!(
            job = job.id,
            segments = segment_count,
            manifest = manifest.url(),
            "fetching segments"
        );

        let reassembler = Reassembler::new(segment_count);
        fetch::spawn_fetches(
            Arc::clone(&self.fetcher),
            segments,
            reassembler.clone(),
            self.progress.clone(),
            job.id,
        );
        let assembly = reassembler.wait().await;

        self.progress.job_state(job.id, JobState::Assembling);
        let bytes = assembly::finalize(&assembly)?;
        let size = bytes.len();

        let sink = Arc::clone(&self.sink);
        let name = job.name.clone();
        let (path, sha256) = tokio::task::spawn_blocking(move || {
            let path = sink.write(&name, &bytes)?;
            Ok::<_, std::io::Error>((path, storage::sha256_hex(&bytes)))
        })
        .await?
        .map_err(RetrievalError::Persist)?;

        Ok(RetrievalReport {
            job: job.id,
            manifest_url: manifest.url().to_string(),
            segment_count,
            bytes: size,
            path,
            sha256,
        })
    }
}

/// Stops the hijack explicitly or, on early return, when dropped.
struct HijackGuard<H: HijackHandle> {
    handle: Option<H>,
}

impl<H: HijackHandle> HijackGuard<H> {
    fn new(handle: H) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.stop() {
                tracing::warn!("stopping interception failed: {e}");
            }
        }
    }
}

impl<H: HijackHandle> Drop for HijackGuard<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The page navigation of one job, joined before the job returns.
enum Navigation<S> {
    Running(JoinHandle<(S, Result<(), PageError>)>),
    /// Already joined; holds the session when navigation succeeded.
    Settled(Option<S>),
}

impl<S> Navigation<S> {
    /// Wait up to `limit` for a still-running navigation, then release the
    /// session. A navigation that does not settle in time is left to finish
    /// on its own.
    async fn settle(self, limit: Duration) {
        let handle = match self {
            Navigation::Running(handle) => handle,
            Navigation::Settled(session) => {
                drop(session);
                return;
            }
        };
        match tokio::time::timeout(limit, handle).await {
            Ok(Ok((_session, Ok(())))) => {}
            Ok(Ok((_session, Err(e)))) => {
                tracing::debug!("navigation ended with error after manifest: {e}")
            }
            Ok(Err(e)) => tracing::warn!("navigation task died: {e}"),
            Err(_) => tracing::warn!(?limit, "page did not settle; detaching navigation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NameHint;
    use crate::page::har::{HarArchive, HarLauncher};
    use crate::progress::ProgressEvent;
    use crate::testing::{MapFetcher, MemorySink, ScriptedLauncher, ScriptedPage};

    const PAGE: &str = "https://soundcloud.com/artist/song";

    fn job(id: JobId) -> RetrievalJob {
        RetrievalJob::new(id, PAGE, NameHint::file("artist - song.mp3"))
    }

    fn settings(timeout_ms: u64) -> RetrieveSettings {
        RetrieveSettings {
            manifest_timeout: Duration::from_millis(timeout_ms),
            ..RetrieveSettings::default()
        }
    }

    fn two_segment_page() -> ScriptedPage {
        ScriptedPage::new(PAGE)
            .exchange("https://soundcloud.com/artist/song", Some("text/html"), "<html>")
            .exchange(
                "https://cf-hls-media.example.com/playlist.m3u8",
                None,
                "seg https://x/0.ts and https://x/1.ts end",
            )
    }

    fn two_segment_fetcher() -> MapFetcher {
        MapFetcher::default()
            .with("https://x/0.ts", b"AA")
            .with("https://x/1.ts", b"BB")
            .with_delay("https://x/0.ts", Duration::from_millis(20))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retrieves_and_persists_in_index_order() {
        let sink = MemorySink::default();
        let launcher = ScriptedLauncher::new([two_segment_page()]);
        let (progress, mut events) = Progress::channel();
        let r = Retriever::new(
            launcher.clone(),
            two_segment_fetcher(),
            sink.clone(),
            settings(2000),
        )
        .with_progress(progress);

        let report = r.retrieve(&job(1)).await.unwrap();
        assert_eq!(report.segment_count, 2);
        assert_eq!(report.bytes, 4);
        assert_eq!(report.manifest_url, "https://cf-hls-media.example.com/playlist.m3u8");
        assert_eq!(report.sha256, storage::sha256_hex(b"AABB"));
        assert_eq!(sink.get("artist - song.mp3").as_deref(), Some(&b"AABB"[..]));
        assert!(launcher.all_hijacks_stopped());

        drop(r);
        let mut seen = Vec::new();
        while let Some(ev) = events.recv().await {
            seen.push(ev);
        }
        let segment_events = seen
            .iter()
            .filter(|ev| matches!(ev, ProgressEvent::SegmentFetched { .. }))
            .count();
        assert_eq!(segment_events, 2);
        assert_eq!(
            seen.first(),
            Some(&ProgressEvent::JobState {
                job: 1,
                state: JobState::ResolvingManifest
            })
        );
        assert!(seen.contains(&ProgressEvent::JobFinished { job: 1, ok: true }));
    }

    #[tokio::test]
    async fn page_without_manifest_is_not_found() {
        let page = ScriptedPage::new(PAGE).exchange(PAGE, Some("text/html"), "<html>");
        let sink = MemorySink::default();
        let r = Retriever::new(
            ScriptedLauncher::new([page]),
            MapFetcher::default(),
            sink.clone(),
            settings(2000),
        );
        let err = r.retrieve(&job(1)).await.unwrap_err();
        assert!(matches!(err, RetrievalError::ManifestNotFound { .. }), "{err}");
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn silent_open_page_times_out() {
        let page = ScriptedPage::new(PAGE).keep_open();
        let launcher = ScriptedLauncher::new([page]);
        let r = Retriever::new(
            launcher.clone(),
            MapFetcher::default(),
            MemorySink::default(),
            settings(50),
        );
        let err = r.retrieve(&job(1)).await.unwrap_err();
        assert!(matches!(err, RetrievalError::ManifestTimeout { .. }), "{err}");
        assert!(err.is_retryable());
        assert!(launcher.all_hijacks_stopped());
    }

    #[tokio::test]
    async fn navigation_failure_fails_fast() {
        let r = Retriever::new(
            ScriptedLauncher::default(),
            MapFetcher::default(),
            MemorySink::default(),
            settings(5000),
        );
        let started = std::time::Instant::now();
        let err = r.retrieve(&job(1)).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Page(PageError::Navigation { .. })), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn manifest_without_segments_is_empty_manifest() {
        let page = ScriptedPage::new(PAGE).exchange(
            "https://x/empty.m3u8",
            None,
            "#EXTM3U\n#EXT-X-ENDLIST\n",
        );
        let r = Retriever::new(
            ScriptedLauncher::new([page]),
            MapFetcher::default(),
            MemorySink::default(),
            settings(2000),
        );
        let err = r.retrieve(&job(1)).await.unwrap_err();
        match err {
            RetrievalError::EmptyManifest { manifest_url } => {
                assert_eq!(manifest_url, "https://x/empty.m3u8")
            }
            other => panic!("expected EmptyManifest, got {other}"),
        }
    }

    #[tokio::test]
    async fn failed_segment_fails_job_and_writes_nothing() {
        let sink = MemorySink::default();
        let fetcher = MapFetcher::default()
            .with("https://x/0.ts", b"AA")
            .with_status("https://x/1.ts", 404);
        let r = Retriever::new(
            ScriptedLauncher::new([two_segment_page()]),
            fetcher,
            sink.clone(),
            settings(2000),
        );
        let err = r.retrieve(&job(1)).await.unwrap_err();
        match err {
            RetrievalError::AssemblyIncomplete(e) => assert_eq!(e.missing_positions, vec![1]),
            other => panic!("expected AssemblyIncomplete, got {other}"),
        }
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn malformed_reference_fails_job() {
        let page = ScriptedPage::new(PAGE).exchange(
            "https://x/p.m3u8",
            None,
            "#EXTM3U\n#EXTINF:1,\nrelative.ts\n",
        );
        let r = Retriever::new(
            ScriptedLauncher::new([page]),
            MapFetcher::default(),
            MemorySink::default(),
            settings(2000),
        );
        let err = r.retrieve(&job(1)).await.unwrap_err();
        assert!(matches!(err, RetrievalError::MalformedSegmentUrl(_)), "{err}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn persist_failure_is_reported() {
        let r = Retriever::new(
            ScriptedLauncher::new([two_segment_page()]),
            two_segment_fetcher(),
            MemorySink::failing(),
            settings(2000),
        );
        let err = r.retrieve(&job(1)).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Persist(_)), "{err}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retrieve_all_isolates_failing_job() {
        let good = |url: &str| {
            ScriptedPage::new(url).exchange(
                format!("{url}/playlist.m3u8"),
                None,
                "https://x/0.ts https://x/1.ts",
            )
        };
        let pages = [
            good("https://sc.com/a/1"),
            ScriptedPage::new("https://sc.com/a/2").exchange(
                "https://sc.com/a/2",
                None,
                "no manifest",
            ),
            good("https://sc.com/a/3"),
        ];
        let fetcher = MapFetcher::default()
            .with("https://x/0.ts", b"AA")
            .with("https://x/1.ts", b"BB");
        let sink = MemorySink::default();
        let r = Arc::new(Retriever::new(
            ScriptedLauncher::new(pages),
            fetcher,
            sink.clone(),
            settings(2000),
        ));
        let jobs = (1..=3)
            .map(|i| {
                RetrievalJob::new(
                    i,
                    format!("https://sc.com/a/{i}"),
                    NameHint::file(format!("{i}.mp3")),
                )
            })
            .collect();
        let report = r.retrieve_all(jobs, 2).await;
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.get(2).unwrap().outcome,
            batch::JobOutcome::Failed(RetrievalError::ManifestNotFound { .. })
        ));
        assert_eq!(sink.get("3.mp3").as_deref(), Some(&b"AABB"[..]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn earlier_of_two_manifests_wins_every_run() {
        let page = ScriptedPage::new(PAGE)
            .exchange(PAGE, Some("text/html"), "<html>")
            .exchange("https://cdn.x/first.m3u8", None, "https://x/0.ts")
            .exchange("https://cdn.x/second.m3u8", None, "https://x/1.ts");
        let r = Retriever::new(
            ScriptedLauncher::new([page]),
            two_segment_fetcher(),
            MemorySink::default(),
            settings(2000),
        );
        for run in 0..20 {
            let report = r.retrieve(&job(run)).await.unwrap();
            assert_eq!(report.manifest_url, "https://cdn.x/first.m3u8", "run {run}");
            assert_eq!(report.bytes, 2);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn capture_redirect_hop_is_not_the_manifest() {
        let har = serde_json::json!({ "log": { "version": "1.2", "entries": [
            {
                "request": { "url": PAGE },
                "response": {
                    "status": 200,
                    "content": { "mimeType": "text/html", "text": "<html>" }
                }
            },
            {
                "request": { "url": "https://cdn.x/p.m3u8" },
                "response": { "status": 302, "redirectURL": "https://cdn2.x/p.m3u8", "content": {} }
            },
            {
                "request": { "url": "https://cdn2.x/p.m3u8" },
                "response": {
                    "status": 200,
                    "content": {
                        "text": "#EXTM3U\n#EXTINF:1,\nhttps://x/0.ts\n#EXTINF:1,\nhttps://x/1.ts\n"
                    }
                }
            }
        ] } });
        let archive = HarArchive::from_json(har.to_string().as_bytes()).unwrap();
        let r = Retriever::new(
            HarLauncher::new([archive]),
            two_segment_fetcher(),
            MemorySink::default(),
            settings(2000),
        );
        for run in 0..20 {
            let report = r.retrieve(&job(run)).await.unwrap();
            assert_eq!(report.manifest_url, "https://cdn2.x/p.m3u8", "run {run}");
            assert_eq!(report.segment_count, 2);
        }
    }
}
