//! Runs a whole conversion: extract, synthesize (concurrently), plan, assemble.

use crate::assemble::{AssemblyInvoker, EncoderConfig};
use crate::audio::pad_with_silence;
use crate::error::PipelineError;
use crate::extract::SlideExtractor;
use crate::model::{AssemblyPlan, AudioClip, SlideRecord, SynthesisStatus};
use crate::planner::{self, PlannerConfig};
use crate::report::Report;
use crate::subtitle;
use crate::tts::{SpeechSynthesizer, SynthesisRequest, VoiceConfig};
use crate::utils::{PronunciationMap, normalize_notes};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct PipelineSettings {
    pub document: PathBuf,
    pub output: PathBuf,
    pub work_dir: PathBuf,
    /// 1-based slide numbers; `None` converts the whole deck.
    pub selection: Option<Vec<usize>>,
    pub voice: VoiceConfig,
    pub planner: PlannerConfig,
    pub encoder: EncoderConfig,
    /// Padded before and after every narrated clip.
    pub silence: Duration,
    pub pronunciations: PronunciationMap,
    pub max_concurrency: usize,
    /// Abort before assembly when more than this share of slides degraded.
    pub max_failure_ratio: f64,
    pub plan_out: Option<PathBuf>,
    pub subtitles: Option<PathBuf>,
}

/// A failed run, with the report when planning got that far.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub report: Option<Report>,
}

impl PipelineFailure {
    fn early(source: impl Into<PipelineError>) -> Self {
        Self {
            error: source.into(),
            report: None,
        }
    }
}

struct Synthesized {
    clips: Vec<AudioClip>,
    total_chars: usize,
    cancelled: bool,
}

pub struct Pipeline {
    extractor: Arc<dyn SlideExtractor>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    assembler: Arc<dyn AssemblyInvoker>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn SlideExtractor>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        assembler: Arc<dyn AssemblyInvoker>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            extractor,
            synthesizer,
            assembler,
            settings,
        }
    }

    /// Runs to completion or until `cancel` resolves. A cancelled run still
    /// plans what finished and reports it, but never assembles.
    pub async fn run<F>(&self, cancel: F) -> Result<Report, PipelineFailure>
    where
        F: Future<Output = ()> + Send,
    {
        let s = &self.settings;
        let audio_dir = s.work_dir.join("audio");
        tokio::fs::create_dir_all(&audio_dir)
            .await
            .map_err(PipelineFailure::early)?;

        info!("Extracting slides from {}", s.document.display());
        let records = self
            .extractor
            .extract_slides(&s.document, s.selection.as_deref(), &s.work_dir)
            .await
            .map_err(|e| {
                error!("Slide extraction failed: {}", e);
                PipelineFailure::early(e)
            })?;
        info!("Extracted {} slides", records.len());
        let records = self.prepare(records);

        let synthesized = self.synthesize_all(&records, &audio_dir, cancel).await;

        let plan = planner::plan(&records, &synthesized.clips, &s.planner)
            .map_err(PipelineFailure::early)?;
        for d in &plan.diagnostics {
            warn!("Slide {} degraded: {}", d.source_number, d.reason);
        }
        info!(
            "Planned {} slides, {} ms total, {} degraded",
            plan.len(),
            plan.total_duration_ms,
            plan.diagnostics.len()
        );

        let mut report = Report::from_plan(&plan, synthesized.total_chars, s.work_dir.clone());
        let fail = |source: PipelineError, report: &Report| PipelineFailure {
            error: source,
            report: Some(report.clone()),
        };

        if let Err(e) = self.write_sidecars(&plan) {
            return Err(fail(e, &report));
        }
        if synthesized.cancelled {
            return Err(fail(PipelineError::Cancelled, &report));
        }
        if plan.degraded_ratio() > s.max_failure_ratio {
            return Err(fail(
                PipelineError::FailureThreshold {
                    degraded: plan.diagnostics.len(),
                    total: plan.len(),
                    max_ratio: s.max_failure_ratio,
                },
                &report,
            ));
        }

        info!("Assembling video {}", s.output.display());
        if let Err(source) = self.assembler.assemble(&plan, &s.output, &s.encoder).await {
            error!("Assembly failed: {}", source);
            return Err(fail(
                PipelineError::Assembly {
                    source,
                    diagnostics: plan.diagnostics.clone(),
                },
                &report,
            ));
        }

        report.output = Some(s.output.clone());
        Ok(report)
    }

    /// Replaces each slide's notes with the text that will actually be spoken,
    /// so a slide whose notes map to nothing is planned as silent.
    fn prepare(&self, records: Vec<SlideRecord>) -> Vec<SlideRecord> {
        let pronunciations = &self.settings.pronunciations;
        records
            .into_iter()
            .map(|mut record| {
                let spoken = pronunciations.apply(&normalize_notes(&record.notes_text));
                record.notes_text = spoken.trim().to_string();
                record
            })
            .collect()
    }

    /// Synthesizes every slide with notes, at most `max_concurrency` at a time.
    /// Results come back in completion order.
    async fn synthesize_all<F>(&self, records: &[SlideRecord], audio_dir: &Path, cancel: F) -> Synthesized
    where
        F: Future<Output = ()> + Send,
    {
        let s = &self.settings;
        let semaphore = Arc::new(Semaphore::new(s.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut total_chars = 0;

        for record in records {
            if !record.has_notes() {
                info!("Skipping slide {} because no note text found", record.source_number);
                continue;
            }
            let text = record.notes_text.clone();
            total_chars += text.chars().count();
            debug!("Slide {} text: {}", record.source_number, text);

            let request = SynthesisRequest {
                slide_index: record.index,
                text,
                out_path: audio_dir.join(format!("audio_{}.wav", record.source_number)),
            };
            let padded = audio_dir.join(format!("audio_{}_padded.wav", record.source_number));
            let synthesizer = Arc::clone(&self.synthesizer);
            let semaphore = Arc::clone(&semaphore);
            let voice = s.voice.clone();
            let silence = s.silence;
            let number = record.source_number;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return AudioClip::skipped(request.slide_index, "synthesis pool closed");
                };
                info!("Synthesizing audio of slide {}", number);
                match synthesizer.synthesize(&request, &voice).await {
                    Ok(clip) => pad_clip(clip, padded, silence).await,
                    Err(e) => {
                        warn!("Speech synthesis failed for slide {}: {}", number, e);
                        AudioClip::failed(request.slide_index, e.to_string())
                    }
                }
            });
        }

        let mut clips = Vec::with_capacity(tasks.len());
        let mut cancelled = false;
        tokio::pin!(cancel);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(clip)) => clips.push(clip),
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => warn!("Synthesis task ended abnormally: {}", e),
                    None => break,
                },
                _ = &mut cancel, if !cancelled => {
                    warn!("Cancellation requested; aborting {} synthesis tasks", tasks.len());
                    cancelled = true;
                    tasks.abort_all();
                }
            }
        }

        Synthesized {
            clips,
            total_chars,
            cancelled,
        }
    }

    fn write_sidecars(&self, plan: &AssemblyPlan) -> Result<(), PipelineError> {
        if let Some(path) = &self.settings.plan_out {
            std::fs::write(path, plan.to_json()?)?;
            info!("Wrote assembly plan to {}", path.display());
        }
        if let Some(path) = &self.settings.subtitles {
            subtitle::write_srt(path, &subtitle::build_cues(plan))?;
            info!("Wrote subtitles to {}", path.display());
        }
        Ok(())
    }
}

/// Surrounds a synthesized clip with silence and re-measures it.
async fn pad_clip(clip: AudioClip, padded: PathBuf, silence: Duration) -> AudioClip {
    if clip.status != SynthesisStatus::Ok || silence.is_zero() {
        return clip;
    }
    let source = clip.audio_path.clone();
    let target = padded.clone();
    let result =
        tokio::task::spawn_blocking(move || pad_with_silence(&source, &target, silence)).await;
    match result {
        Ok(Ok(duration_ms)) => AudioClip::ok(clip.slide_index, padded, duration_ms),
        Ok(Err(e)) => AudioClip::failed(clip.slide_index, format!("padding audio failed: {}", e)),
        Err(e) => AudioClip::failed(clip.slide_index, format!("padding audio failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{wav_duration_ms, write_tone};
    use crate::error::{AssemblyError, ExtractionError, SynthesisError, SynthesisErrorKind};
    use crate::model::DiagnosticKind;
    use crate::tts::Provider;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeExtractor {
        notes: Vec<&'static str>,
    }

    #[async_trait]
    impl SlideExtractor for FakeExtractor {
        async fn extract_slides(
            &self,
            _document: &Path,
            _selection: Option<&[usize]>,
            work_dir: &Path,
        ) -> Result<Vec<SlideRecord>, ExtractionError> {
            Ok(self
                .notes
                .iter()
                .enumerate()
                .map(|(index, notes)| SlideRecord {
                    index,
                    source_number: index + 1,
                    image_path: work_dir.join(format!("slides/slide_{}.png", index + 1)),
                    notes_text: notes.to_string(),
                })
                .collect())
        }
    }

    struct BrokenExtractor;

    #[async_trait]
    impl SlideExtractor for BrokenExtractor {
        async fn extract_slides(
            &self,
            _document: &Path,
            _selection: Option<&[usize]>,
            _work_dir: &Path,
        ) -> Result<Vec<SlideRecord>, ExtractionError> {
            Err(ExtractionError::HostUnavailable("soffice".to_string()))
        }
    }

    #[derive(Clone, Copy)]
    enum Script {
        Speak { ms: u32, delay_ms: u64 },
        Fail,
        Hang,
        Panic,
    }

    struct FakeSynth {
        script: fn(&str) -> Script,
        heard: Mutex<Vec<String>>,
    }

    impl FakeSynth {
        fn new(script: fn(&str) -> Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                heard: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynth {
        async fn synthesize(
            &self,
            request: &SynthesisRequest,
            _voice: &VoiceConfig,
        ) -> Result<AudioClip, SynthesisError> {
            self.heard.lock().unwrap().push(request.text.clone());
            match (self.script)(&request.text) {
                Script::Speak { ms, delay_ms } => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    write_tone(&request.out_path, 16_000, ms * 16);
                    Ok(AudioClip::ok(request.slide_index, request.out_path.clone(), ms as u64))
                }
                Script::Fail => Err(SynthesisError::new(SynthesisErrorKind::Quota, "quota exceeded")),
                Script::Panic => panic!("synthesizer crashed on {:?}", request.text),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(SynthesisError::new(SynthesisErrorKind::Network, "timeout"))
                }
            }
        }
    }

    #[derive(Default)]
    struct FakeAssembler {
        seen: Mutex<Option<AssemblyPlan>>,
        fail: bool,
    }

    #[async_trait]
    impl AssemblyInvoker for FakeAssembler {
        async fn assemble(
            &self,
            plan: &AssemblyPlan,
            _output: &Path,
            _encoder: &EncoderConfig,
        ) -> Result<(), AssemblyError> {
            *self.seen.lock().unwrap() = Some(plan.clone());
            if self.fail {
                return Err(AssemblyError::EncoderMissing("ffmpeg".to_string()));
            }
            Ok(())
        }
    }

    fn settings(work_dir: &Path) -> PipelineSettings {
        PipelineSettings {
            document: work_dir.join("deck.pptx"),
            output: work_dir.join("talk.mp4"),
            work_dir: work_dir.to_path_buf(),
            selection: None,
            voice: VoiceConfig {
                provider: Provider::Local,
                voice_id: "voice.onnx".to_string(),
                rate: 1.0,
                api_key: None,
                region: None,
            },
            planner: PlannerConfig::new(1000),
            encoder: EncoderConfig {
                width: 1280,
                height: 720,
                frame_rate: 5,
                video_codec: "libx264".to_string(),
                audio_codec: "aac".to_string(),
            },
            silence: Duration::ZERO,
            pronunciations: PronunciationMap::default(),
            max_concurrency: 4,
            max_failure_ratio: 1.0,
            plan_out: None,
            subtitles: None,
        }
    }

    fn pipeline(
        notes: Vec<&'static str>,
        synth: Arc<FakeSynth>,
        assembler: Arc<FakeAssembler>,
        settings: PipelineSettings,
    ) -> Pipeline {
        Pipeline::new(Arc::new(FakeExtractor { notes }), synth, assembler, settings)
    }

    fn hello_world(text: &str) -> Script {
        match text {
            "World" => Script::Fail,
            _ => Script::Speak { ms: 1200, delay_ms: 0 },
        }
    }

    #[tokio::test]
    async fn failed_slide_is_kept_silent_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = Arc::new(FakeAssembler::default());
        let p = pipeline(
            vec!["Hello", "", "World"],
            FakeSynth::new(hello_world),
            assembler.clone(),
            settings(dir.path()),
        );

        let report = p.run(std::future::pending()).await.unwrap();
        assert_eq!(report.total_slides, 3);
        assert_eq!(report.total_duration_ms, 1200 + 1000 + 1000);
        assert_eq!(report.total_chars, 10);
        assert_eq!(report.degraded.len(), 1);
        assert_eq!(report.degraded[0].index, 2);
        assert!(report.degraded[0].reason.starts_with("SynthesisError"));
        assert_eq!(report.output, Some(dir.path().join("talk.mp4")));

        let plan = assembler.seen.lock().unwrap().clone().unwrap();
        let shape: Vec<_> = plan
            .entries
            .iter()
            .map(|e| (e.audio_path.is_some(), e.display_duration_ms))
            .collect();
        assert_eq!(shape, vec![(true, 1200), (false, 1000), (false, 1000)]);
    }

    #[tokio::test]
    async fn plan_order_ignores_completion_order() {
        fn slow_first(text: &str) -> Script {
            let n: u64 = text.trim_start_matches("slide ").parse().unwrap();
            Script::Speak { ms: 1000 + n as u32 * 100, delay_ms: (8 - n) * 15 }
        }
        let dir = tempfile::tempdir().unwrap();
        let assembler = Arc::new(FakeAssembler::default());
        let notes = vec!["slide 0", "slide 1", "slide 2", "slide 3", "slide 4", "slide 5", "slide 6", "slide 7"];
        let p = pipeline(notes, FakeSynth::new(slow_first), assembler.clone(), settings(dir.path()));

        p.run(std::future::pending()).await.unwrap();
        let plan = assembler.seen.lock().unwrap().clone().unwrap();
        let indices: Vec<_> = plan.entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
        let durations: Vec<_> = plan.entries.iter().map(|e| e.display_duration_ms).collect();
        assert_eq!(durations, (0..8).map(|n| 1000 + n * 100).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn too_many_failures_abort_before_assembly() {
        fn mostly_failing(text: &str) -> Script {
            if text == "ok" { Script::Speak { ms: 2000, delay_ms: 0 } } else { Script::Fail }
        }
        let dir = tempfile::tempdir().unwrap();
        let assembler = Arc::new(FakeAssembler::default());
        let mut cfg = settings(dir.path());
        cfg.max_failure_ratio = 0.5;
        let p = pipeline(vec!["ok", "bad", "worse"], FakeSynth::new(mostly_failing), assembler.clone(), cfg);

        let failure = p.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(
            failure.error,
            PipelineError::FailureThreshold { degraded: 2, total: 3, .. }
        ));
        assert_eq!(failure.report.unwrap().degraded.len(), 2);
        assert!(assembler.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn cancellation_keeps_finished_slides_and_skips_assembly() {
        fn second_hangs(text: &str) -> Script {
            if text == "stuck" { Script::Hang } else { Script::Speak { ms: 1500, delay_ms: 0 } }
        }
        let dir = tempfile::tempdir().unwrap();
        let assembler = Arc::new(FakeAssembler::default());
        let p = pipeline(vec!["fine", "stuck"], FakeSynth::new(second_hangs), assembler.clone(), settings(dir.path()));

        let failure = p
            .run(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, PipelineError::Cancelled));
        assert_eq!(failure.to_string(), PipelineError::Cancelled.to_string());
        assert!(std::error::Error::source(&failure).is_none());
        let report = failure.report.unwrap();
        assert_eq!(report.total_slides, 2);
        assert_eq!(report.total_duration_ms, 1500 + 1000);
        assert_eq!(report.degraded.len(), 1);
        assert_eq!(report.degraded[0].kind, DiagnosticKind::Missing);
        assert!(assembler.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn extraction_failure_is_fatal_without_report() {
        let dir = tempfile::tempdir().unwrap();
        let p = Pipeline::new(
            Arc::new(BrokenExtractor),
            FakeSynth::new(hello_world),
            Arc::new(FakeAssembler::default()),
            settings(dir.path()),
        );
        let failure = p.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(failure.error, PipelineError::Extraction(_)));
        assert!(failure.report.is_none());
    }

    #[tokio::test]
    async fn assembly_failure_carries_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = Arc::new(FakeAssembler {
            fail: true,
            ..Default::default()
        });
        let p = pipeline(vec!["Hello", "World"], FakeSynth::new(hello_world), assembler, settings(dir.path()));
        let failure = p.run(std::future::pending()).await.unwrap_err();
        match failure.error {
            PipelineError::Assembly { diagnostics, .. } => assert_eq!(diagnostics.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
        assert!(failure.report.is_some());
    }

    #[tokio::test]
    async fn notes_are_normalized_and_respelled() {
        let dir = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(hello_world);
        let mut cfg = settings(dir.path());
        cfg.pronunciations = PronunciationMap::parse("SQL=sequel").unwrap();
        let p = pipeline(
            vec!["We use\nSQL daily.\r\n", "   "],
            synth.clone(),
            Arc::new(FakeAssembler::default()),
            cfg,
        );
        p.run(std::future::pending()).await.unwrap();
        assert_eq!(*synth.heard.lock().unwrap(), vec!["We use sequel daily.".to_string()]);
    }

    #[tokio::test]
    async fn clips_are_padded_with_silence() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = Arc::new(FakeAssembler::default());
        let mut cfg = settings(dir.path());
        cfg.silence = Duration::from_millis(500);
        let p = pipeline(vec!["Hello"], FakeSynth::new(hello_world), assembler.clone(), cfg);

        p.run(std::future::pending()).await.unwrap();
        let plan = assembler.seen.lock().unwrap().clone().unwrap();
        let entry = &plan.entries[0];
        assert_eq!(entry.display_duration_ms, 2200);
        let audio = entry.audio_path.clone().unwrap();
        assert!(audio.ends_with("audio/audio_1_padded.wav"));
        assert_eq!(wav_duration_ms(&audio).unwrap(), 2200);
    }

    #[tokio::test]
    async fn sidecars_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = settings(dir.path());
        cfg.plan_out = Some(dir.path().join("plan.json"));
        cfg.subtitles = Some(dir.path().join("talk.srt"));
        let p = pipeline(
            vec!["Hello", "World"],
            FakeSynth::new(hello_world),
            Arc::new(FakeAssembler::default()),
            cfg,
        );
        p.run(std::future::pending()).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("plan.json")).unwrap()).unwrap();
        assert_eq!(json["entries"].as_array().unwrap().len(), 2);
        assert_eq!(json["diagnostics"][0]["kind"], "synthesis_failed");
        let srt = std::fs::read_to_string(dir.path().join("talk.srt")).unwrap();
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,200\nHello\n"));
    }

    #[tokio::test]
    async fn panicking_synthesis_counts_as_missing() {
        fn boom(text: &str) -> Script {
            if text == "boom" { Script::Panic } else { Script::Speak { ms: 1800, delay_ms: 0 } }
        }
        let dir = tempfile::tempdir().unwrap();
        let assembler = Arc::new(FakeAssembler::default());
        let p = pipeline(vec!["fine", "boom", "also fine"], FakeSynth::new(boom), assembler.clone(), settings(dir.path()));

        let report = p.run(std::future::pending()).await.unwrap();
        assert_eq!(report.total_slides, 3);
        assert_eq!(report.degraded.len(), 1);
        assert_eq!(report.degraded[0].index, 1);
        assert_eq!(report.degraded[0].kind, DiagnosticKind::Missing);

        let plan = assembler.seen.lock().unwrap().clone().unwrap();
        let shape: Vec<_> = plan
            .entries
            .iter()
            .map(|e| (e.audio_path.is_some(), e.display_duration_ms))
            .collect();
        assert_eq!(shape, vec![(true, 1800), (false, 1000), (true, 1800)]);
    }

    #[tokio::test]
    async fn notes_mapped_to_nothing_are_silent_not_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(hello_world);
        let assembler = Arc::new(FakeAssembler::default());
        let mut cfg = settings(dir.path());
        cfg.pronunciations = PronunciationMap::parse("um=").unwrap();
        cfg.max_failure_ratio = 0.0;
        let p = pipeline(vec!["um", "Hello", "Um um"], synth.clone(), assembler.clone(), cfg);

        let report = p.run(std::future::pending()).await.unwrap();
        assert_eq!(*synth.heard.lock().unwrap(), vec!["Hello".to_string()]);
        assert!(report.degraded.is_empty());
        assert_eq!(report.total_chars, 5);

        let plan = assembler.seen.lock().unwrap().clone().unwrap();
        let captions: Vec<_> = plan.entries.iter().map(|e| e.caption.as_str()).collect();
        assert_eq!(captions, vec!["", "Hello", ""]);
    }
}
