//! Frame pipeline and confirmation engine
//!
//! Wires the per-frame stages together: a worker thread consumes frames
//! (keep-latest, never queueing), runs the visibility filter, both candidate
//! tracks and the narrowing search, and raises confirmation prompts; a timer
//! thread evaluates the voting window on a fixed period. All cross-thread
//! state lives behind a single mutex, and prompts are always raised with the
//! lock released so a slow operator never stalls the evaluation timer.

use crossbeam_channel::{unbounded, Sender};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::detect::TextDetector;
use crate::filter::{is_similar_text, sanitize_plate_text, PlateFilter};
use crate::frame::Frame;
use crate::geometry::center_distance;
use crate::registry::PlateRegistry;
use crate::voting::{PlateDetection, PromptCandidate, WindowVoting};
use crate::zoom::ZoomSearch;

/// Operator response to a confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Candidate confirmed as-is.
    Accepted,
    /// Candidate confirmed under operator-corrected text.
    Edited(String),
    /// Candidate declined.
    Rejected,
    /// Prompt dismissed without a decision.
    Cancelled,
}

/// Surface that presents confirmation prompts to the operator.
///
/// Called from the frame worker thread; implementations may block until the
/// operator responds. A snapshot is provided when the prompt came from the
/// narrowing-search track.
pub trait ConfirmationUi: Send + Sync {
    fn request_confirmation(
        &self,
        candidate: &str,
        snapshot: Option<&RgbaImage>,
    ) -> ConfirmationOutcome;
}

/// Where a candidate string stands in the confirmation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    /// No votes on either track.
    Unseen,
    /// Accumulating votes, below prompt conditions.
    Voting,
    /// A confirmation prompt is outstanding.
    PromptPending,
    /// In the confirmed-set.
    Confirmed,
}

/// Short-lived history of visible-text readings, pruned by age.
pub struct RecentDetections {
    entries: VecDeque<(Instant, String)>,
    retention: Duration,
}

impl RecentDetections {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            retention,
        }
    }

    /// Record a reading and drop everything past retention.
    pub fn record(&mut self, text: String) {
        let now = Instant::now();
        self.entries.push_back((now, text));
        self.prune(now);
    }

    /// Readings still inside the retention horizon, newest first.
    pub fn snapshot(&mut self) -> Vec<String> {
        self.prune(Instant::now());
        self.entries
            .iter()
            .rev()
            .map(|(_, text)| text.clone())
            .collect()
    }

    fn prune(&mut self, now: Instant) {
        while let Some((seen, _)) = self.entries.front() {
            if now.duration_since(*seen) > self.retention {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}

/// State shared between the worker, the timer, and engine accessors.
struct PipelineState {
    filter: PlateFilter,
    voting: WindowVoting,
    registry: PlateRegistry,
    recent: RecentDetections,
    /// Single-flight guard for the algorithm track's prompt.
    algorithm_prompt_open: bool,
}

/// The running engine: owns the worker and timer threads.
///
/// Dropping the engine disconnects both threads and joins them.
pub struct Engine {
    state: Arc<Mutex<PipelineState>>,
    processing: Arc<AtomicBool>,
    frame_tx: Option<Sender<Frame>>,
    shutdown_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl Engine {
    /// Start the engine with the given detector and confirmation surface.
    pub fn new(
        config: EngineConfig,
        detector: Arc<dyn TextDetector>,
        ui: Arc<dyn ConfirmationUi>,
    ) -> Self {
        let state = Arc::new(Mutex::new(PipelineState {
            filter: PlateFilter::new(&config.plate, &config.filter),
            voting: WindowVoting::new(
                config.plate.min_length,
                config.plate.max_length,
                config.plate.confirmation_threshold,
            ),
            registry: PlateRegistry::new(&config.similarity),
            recent: RecentDetections::new(Duration::from_millis(config.window.recent_retention_ms)),
            algorithm_prompt_open: false,
        }));
        let processing = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = unbounded::<Frame>();
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();

        let worker = {
            let state = Arc::clone(&state);
            let processing = Arc::clone(&processing);
            let detector = Arc::clone(&detector);
            let zoom_settings = config.zoom.clone();
            let min_length = config.plate.min_length;
            let max_length = config.plate.max_length;
            std::thread::spawn(move || {
                let mut zoom = ZoomSearch::new(zoom_settings, min_length, max_length);
                while let Ok(frame) = frame_rx.recv() {
                    process_frame(frame, detector.as_ref(), ui.as_ref(), &state, &mut zoom);
                    processing.store(false, Ordering::SeqCst);
                }
                debug!("frame worker exiting");
            })
        };

        let timer = {
            let state = Arc::clone(&state);
            let ticker = crossbeam_channel::tick(Duration::from_millis(config.window.interval_ms));
            std::thread::spawn(move || {
                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => evaluate_window(&state),
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("window timer exiting");
            })
        };

        info!("engine started");
        Self {
            state,
            processing,
            frame_tx: Some(frame_tx),
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
            timer: Some(timer),
        }
    }

    /// Offer a frame to the worker.
    ///
    /// Returns `false` when the worker is still busy with the previous frame
    /// (the new frame is dropped, never queued).
    pub fn submit_frame(&self, frame: Frame) -> bool {
        if self.processing.swap(true, Ordering::SeqCst) {
            debug!("worker busy, dropping frame");
            return false;
        }
        let Some(tx) = &self.frame_tx else {
            self.processing.store(false, Ordering::SeqCst);
            return false;
        };
        if tx.send(frame).is_err() {
            warn!("frame worker unavailable");
            self.processing.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// True while a frame is being processed.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Update the preview surface dimensions the visibility window maps to.
    pub fn update_preview_size(&self, width: i32, height: i32) {
        self.state.lock().filter.update_preview_size(width, height);
    }

    /// Update the vertical visible fraction, clamped to its floor.
    pub fn update_vertical_fraction(&self, fraction: f32) {
        self.state.lock().filter.update_vertical_fraction(fraction);
    }

    /// Update the horizontal visible fraction, clamped to its floor.
    pub fn update_horizontal_fraction(&self, fraction: f32) {
        self.state.lock().filter.update_horizontal_fraction(fraction);
    }

    /// Registered plate strings in sorted order.
    pub fn confirmed_plates(&self) -> Vec<String> {
        self.state.lock().registry.plates()
    }

    /// Sorted, newline-joined plate list for export.
    pub fn share_list(&self) -> String {
        self.state.lock().registry.share_list()
    }

    /// Remove a plate from the registry and the confirmed-set.
    pub fn remove_plate(&self, text: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.registry.remove(text).is_some();
        if removed {
            // A removed plate starts over from zero on both tracks.
            state.filter.reset_candidate(text);
            state.voting.clear_candidate(text);
        }
        removed
    }

    /// Current window candidates ranked by votes, then centeredness.
    pub fn ranking(&self) -> Vec<(String, u32)> {
        self.state.lock().voting.ranking()
    }

    /// Visible-text readings from the last few seconds, newest first.
    pub fn recent_detections(&self) -> Vec<String> {
        self.state.lock().recent.snapshot()
    }

    /// Where a string stands in the confirmation lifecycle.
    pub fn candidate_state(&self, text: &str) -> CandidateState {
        let sanitized = sanitize_plate_text(text);
        let state = self.state.lock();
        if state.registry.is_confirmed(&sanitized) {
            CandidateState::Confirmed
        } else if state.voting.pending_candidate() == Some(sanitized.as_str())
            || state.filter.is_prompted(&sanitized)
        {
            CandidateState::PromptPending
        } else if state.voting.votes(&sanitized) > 0 || state.filter.algorithm_votes(&sanitized) > 0
        {
            CandidateState::Voting
        } else {
            CandidateState::Unseen
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Disconnecting the channels ends both loops.
        drop(self.frame_tx.take());
        drop(self.shutdown_tx.take());
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.timer.take() {
            let _ = handle.join();
        }
        info!("engine stopped");
    }
}

fn evaluate_window(state: &Mutex<PipelineState>) {
    let mut guard = state.lock();
    let PipelineState {
        voting, registry, ..
    } = &mut *guard;
    if let Some(winner) = voting.evaluate() {
        registry.insert_or_update(&winner.text, winner.area, winner.image);
    }
}

/// One full pass over a frame: visibility filter, both candidate tracks,
/// narrowing search, and any prompts those raise.
fn process_frame(
    frame: Frame,
    detector: &dyn TextDetector,
    ui: &dyn ConfirmationUi,
    state: &Mutex<PipelineState>,
    zoom: &mut ZoomSearch,
) {
    let upright = frame.into_upright();
    let frame_width = upright.width() as i32;
    let frame_height = upright.height() as i32;

    let lines = match detector.detect(&upright) {
        Ok(lines) => Some(lines),
        Err(err) => {
            warn!("full-frame detection failed: {err}");
            None
        }
    };

    let algorithm_prompt = if let Some(lines) = &lines {
        let mut guard = state.lock();
        let state = &mut *guard;
        if let Some(text) = state.filter.filter_visible_text(lines, frame_width, frame_height) {
            state.recent.record(text);
        }
        let algorithm = state
            .filter
            .compute_algorithm_result(lines, frame_width, frame_height);
        let PipelineState {
            filter, registry, ..
        } = state;
        let prompt =
            filter.register_algorithm_result(algorithm.as_deref(), |s| registry.is_confirmed(s));
        match prompt {
            Some(prompt) if !state.algorithm_prompt_open => {
                state.algorithm_prompt_open = true;
                Some(prompt)
            }
            Some(_) => None,
            None => None,
        }
    } else {
        None
    };

    if let Some(prompt) = algorithm_prompt {
        let outcome = ui.request_confirmation(&prompt.sanitized_value, None);
        handle_algorithm_outcome(state, &prompt.sanitized_value, outcome);
    }

    let Some(result) = zoom.run(detector, &upright) else {
        return;
    };

    let window_prompt = {
        let mut guard = state.lock();
        let state = &mut *guard;
        if !state.filter.length_in_bounds(&result.text) {
            None
        } else {
            let distance = center_distance(&result.rect, result.frame_width, result.frame_height);
            state.voting.record(PlateDetection {
                text: result.text.clone(),
                area: result.rect.area(),
                image: result.image,
                rect: result.rect,
                center_distance: distance,
            });
            let PipelineState {
                voting, registry, ..
            } = state;
            voting.take_prompt_candidate(|s| registry.is_confirmed(s))
        }
    };

    if let Some(candidate) = window_prompt {
        let outcome = ui.request_confirmation(&candidate.text, Some(&candidate.image));
        handle_window_outcome(state, candidate, outcome);
    }
}

fn handle_window_outcome(
    state: &Mutex<PipelineState>,
    candidate: PromptCandidate,
    outcome: ConfirmationOutcome,
) {
    let mut guard = state.lock();
    let state = &mut *guard;
    match outcome {
        ConfirmationOutcome::Accepted => {
            state.registry.confirm(&candidate.text);
            state
                .registry
                .insert_or_update(&candidate.text, candidate.area, candidate.image);
            state.filter.reset_candidate(&candidate.text);
        }
        ConfirmationOutcome::Edited(input) => {
            let edited = sanitize_plate_text(&input);
            if state.filter.length_in_bounds(&edited) {
                if edited != candidate.text && !is_similar_text(&edited, &candidate.text) {
                    warn!(
                        "operator edit {edited:?} differs substantially from candidate {:?}",
                        candidate.text
                    );
                }
                state.registry.confirm(&edited);
                state
                    .registry
                    .insert_or_update(&edited, candidate.area, candidate.image);
                state.filter.reset_candidate(&edited);
            } else {
                warn!("edited text {edited:?} rejected: length out of bounds");
            }
        }
        ConfirmationOutcome::Rejected | ConfirmationOutcome::Cancelled => {
            // Declined candidates start over from zero votes.
            state.voting.clear_candidate(&candidate.text);
        }
    }
    state.voting.resolve_prompt();
}

fn handle_algorithm_outcome(
    state: &Mutex<PipelineState>,
    candidate: &str,
    outcome: ConfirmationOutcome,
) {
    let mut guard = state.lock();
    let state = &mut *guard;
    match outcome {
        ConfirmationOutcome::Accepted => {
            confirm_without_snapshot(state, candidate);
            state.filter.reset_candidate(candidate);
        }
        ConfirmationOutcome::Edited(input) => {
            let edited = sanitize_plate_text(&input);
            if state.filter.length_in_bounds(&edited) {
                if edited != candidate && !is_similar_text(&edited, candidate) {
                    warn!(
                        "operator edit {edited:?} differs substantially from candidate {candidate:?}"
                    );
                }
                confirm_without_snapshot(state, &edited);
                state.filter.reset_candidate(&edited);
            } else {
                warn!("edited text {edited:?} rejected: length out of bounds");
            }
            state.filter.reset_candidate(candidate);
        }
        ConfirmationOutcome::Rejected | ConfirmationOutcome::Cancelled => {
            state.filter.reset_candidate(candidate);
        }
    }
    state.algorithm_prompt_open = false;
}

/// Confirm a plate seen only by the algorithm track: no snapshot exists yet,
/// so a zero-area placeholder holds the slot until the narrowing search
/// produces a real capture (any real area replaces it).
fn confirm_without_snapshot(state: &mut PipelineState, text: &str) {
    state.registry.confirm(text);
    state
        .registry
        .insert_or_update(text, 0, RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255])));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectorError, TextLine};
    use crate::geometry::PixelRect;
    use std::sync::Mutex as StdMutex;

    /// Detector that reports one plate line on every call.
    struct PlateDetector {
        text: String,
        delay: Duration,
    }

    impl PlateDetector {
        fn new(text: &str) -> Self {
            Self {
                text: text.to_string(),
                delay: Duration::ZERO,
            }
        }

        fn slow(text: &str, delay: Duration) -> Self {
            Self {
                text: text.to_string(),
                delay,
            }
        }
    }

    impl TextDetector for PlateDetector {
        fn detect(&self, _image: &RgbaImage) -> Result<Vec<TextLine>, DetectorError> {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            Ok(vec![TextLine::new(
                &self.text,
                PixelRect::new(300, 400, 600, 460),
            )])
        }
    }

    /// Confirmation surface driven by a scripted list of outcomes.
    struct ScriptedUi {
        outcomes: StdMutex<VecDeque<ConfirmationOutcome>>,
        prompts: StdMutex<Vec<String>>,
    }

    impl ScriptedUi {
        fn new(outcomes: Vec<ConfirmationOutcome>) -> Self {
            Self {
                outcomes: StdMutex::new(outcomes.into()),
                prompts: StdMutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl ConfirmationUi for ScriptedUi {
        fn request_confirmation(
            &self,
            candidate: &str,
            _snapshot: Option<&RgbaImage>,
        ) -> ConfirmationOutcome {
            self.prompts.lock().unwrap().push(candidate.to_string());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ConfirmationOutcome::Cancelled)
        }
    }

    fn frame() -> Frame {
        Frame::new(RgbaImage::from_pixel(1000, 1000, Rgba([128, 128, 128, 255])), 0)
    }

    /// Long window interval keeps the timer out of prompt-path tests, and a
    /// high algorithm threshold keeps the independent algorithm track from
    /// raising prompts of its own within a few frames.
    fn quiet_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.window.interval_ms = 60_000;
        config.plate.algorithm_confirmation_threshold = 100;
        config
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn submit_and_wait(engine: &Engine, count: usize) {
        for _ in 0..count {
            assert!(wait_until(|| !engine.is_processing()));
            assert!(engine.submit_frame(frame()));
        }
        assert!(wait_until(|| !engine.is_processing()));
    }

    #[test]
    fn test_two_votes_prompt_and_accept_registers_plate() {
        let ui = Arc::new(ScriptedUi::new(vec![ConfirmationOutcome::Accepted]));
        let engine = Engine::new(
            quiet_config(),
            Arc::new(PlateDetector::new("AB12345")),
            ui.clone(),
        );

        submit_and_wait(&engine, 2);

        assert_eq!(ui.prompts(), vec!["AB12345".to_string()]);
        assert!(wait_until(|| engine.confirmed_plates() == vec!["AB12345".to_string()]));
        assert_eq!(engine.candidate_state("AB12345"), CandidateState::Confirmed);
        assert_eq!(engine.share_list(), "AB12345");
    }

    #[test]
    fn test_rejected_candidate_restarts_voting() {
        let ui = Arc::new(ScriptedUi::new(vec![ConfirmationOutcome::Rejected]));
        let engine = Engine::new(
            quiet_config(),
            Arc::new(PlateDetector::new("AB12345")),
            ui.clone(),
        );

        submit_and_wait(&engine, 2);

        assert_eq!(ui.prompts().len(), 1);
        assert!(engine.confirmed_plates().is_empty());
        // The window entry was cleared; a fresh prompt needs two new votes.
        assert!(engine.ranking().is_empty());
        submit_and_wait(&engine, 1);
        assert_eq!(ui.prompts().len(), 1, "one vote must not re-prompt");
    }

    #[test]
    fn test_algorithm_track_prompts_independently_of_window_track() {
        let mut config = quiet_config();
        config.plate.algorithm_confirmation_threshold = 3;
        // Window prompts stay out of the way; only the algorithm track can
        // reach its threshold here.
        config.plate.confirmation_threshold = 100;
        let ui = Arc::new(ScriptedUi::new(vec![ConfirmationOutcome::Accepted]));
        let engine = Engine::new(
            config,
            Arc::new(PlateDetector::new("AB12345")),
            ui.clone(),
        );

        submit_and_wait(&engine, 3);

        assert_eq!(ui.prompts(), vec!["AB12345".to_string()]);
        assert_eq!(engine.confirmed_plates(), vec!["AB12345".to_string()]);
    }

    #[test]
    fn test_edited_outcome_confirms_corrected_text() {
        let ui = Arc::new(ScriptedUi::new(vec![ConfirmationOutcome::Edited(
            "ab-12346".to_string(),
        )]));
        let engine = Engine::new(
            quiet_config(),
            Arc::new(PlateDetector::new("AB12345")),
            ui.clone(),
        );

        submit_and_wait(&engine, 2);

        assert_eq!(engine.confirmed_plates(), vec!["AB12346".to_string()]);
        assert_eq!(engine.candidate_state("AB12346"), CandidateState::Confirmed);
    }

    #[test]
    fn test_invalid_edit_confirms_nothing() {
        let ui = Arc::new(ScriptedUi::new(vec![ConfirmationOutcome::Edited(
            "ab".to_string(),
        )]));
        let engine = Engine::new(
            quiet_config(),
            Arc::new(PlateDetector::new("AB12345")),
            ui.clone(),
        );

        submit_and_wait(&engine, 2);

        assert_eq!(ui.prompts().len(), 1);
        assert!(engine.confirmed_plates().is_empty());
    }

    #[test]
    fn test_removed_plate_can_be_confirmed_again() {
        let ui = Arc::new(ScriptedUi::new(vec![
            ConfirmationOutcome::Accepted,
            ConfirmationOutcome::Accepted,
        ]));
        let engine = Engine::new(
            quiet_config(),
            Arc::new(PlateDetector::new("AB12345")),
            ui.clone(),
        );

        submit_and_wait(&engine, 2);
        assert_eq!(engine.confirmed_plates(), vec!["AB12345".to_string()]);

        assert!(engine.remove_plate("AB12345"));
        assert!(engine.confirmed_plates().is_empty());
        assert_eq!(engine.candidate_state("AB12345"), CandidateState::Unseen);

        submit_and_wait(&engine, 2);
        assert_eq!(engine.confirmed_plates(), vec!["AB12345".to_string()]);
        assert_eq!(ui.prompts().len(), 2);
    }

    #[test]
    fn test_busy_worker_drops_frames() {
        let ui = Arc::new(ScriptedUi::new(vec![]));
        let engine = Engine::new(
            quiet_config(),
            Arc::new(PlateDetector::slow("AB12345", Duration::from_millis(300))),
            ui,
        );

        assert!(engine.submit_frame(frame()));
        assert!(!engine.submit_frame(frame()), "second frame must be dropped");
        assert!(wait_until(|| !engine.is_processing()));
    }

    #[test]
    fn test_timer_evaluation_clears_window_votes() {
        let mut config = EngineConfig::default();
        config.window.interval_ms = 50;
        // Threshold high enough that no prompt interferes.
        config.plate.confirmation_threshold = 100;
        let ui = Arc::new(ScriptedUi::new(vec![]));
        let engine = Engine::new(config, Arc::new(PlateDetector::new("AB12345")), ui);

        submit_and_wait(&engine, 1);
        assert!(wait_until(|| engine.ranking().is_empty()));
        // Unconfirmed winners never reach the registry.
        assert!(engine.confirmed_plates().is_empty());
    }

    #[test]
    fn test_recent_detections_capture_visible_text() {
        let ui = Arc::new(ScriptedUi::new(vec![]));
        let mut config = quiet_config();
        config.plate.confirmation_threshold = 100;
        let engine = Engine::new(config, Arc::new(PlateDetector::new("AB12345")), ui);
        engine.update_preview_size(1000, 1000);

        submit_and_wait(&engine, 1);
        let recent = engine.recent_detections();
        assert_eq!(recent, vec!["AB12345".to_string()]);
    }

    #[test]
    fn test_recent_detections_prune_by_age() {
        let mut recent = RecentDetections::new(Duration::from_millis(30));
        recent.record("AB12345".to_string());
        std::thread::sleep(Duration::from_millis(60));
        recent.record("CD67890".to_string());
        assert_eq!(recent.snapshot(), vec!["CD67890".to_string()]);
    }

    #[test]
    fn test_candidate_state_progression() {
        let ui = Arc::new(ScriptedUi::new(vec![ConfirmationOutcome::Accepted]));
        let engine = Engine::new(
            quiet_config(),
            Arc::new(PlateDetector::new("AB12345")),
            ui,
        );

        assert_eq!(engine.candidate_state("AB12345"), CandidateState::Unseen);
        submit_and_wait(&engine, 1);
        assert_eq!(engine.candidate_state("AB12345"), CandidateState::Voting);
        submit_and_wait(&engine, 1);
        assert_eq!(engine.candidate_state("AB12345"), CandidateState::Confirmed);
    }
}
