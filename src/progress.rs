use futures::future::{BoxFuture, FutureExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub message: String,
    pub percent: u8,
    pub detail: Option<String>,
}

/// Receives ordered progress events. The engine awaits every `report` before advancing, so a slow
/// sink stalls the run instead of dropping or reordering events.
pub trait ProgressSink: Send + Sync {
    fn report<'a>(&'a self, update: ProgressUpdate) -> BoxFuture<'a, ()>;
}

/// Plain synchronous callback.
pub struct CallbackSink<F>
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressSink for CallbackSink<F>
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn report<'a>(&'a self, update: ProgressUpdate) -> BoxFuture<'a, ()> {
        (self.callback)(&update);
        futures::future::ready(()).boxed()
    }
}

/// Cooperative callback whose returned future is awaited to completion.
pub struct AsyncCallbackSink<F, Fut>
where
    F: Fn(ProgressUpdate) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    callback: F,
}

impl<F, Fut> AsyncCallbackSink<F, Fut>
where
    F: Fn(ProgressUpdate) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F, Fut> ProgressSink for AsyncCallbackSink<F, Fut>
where
    F: Fn(ProgressUpdate) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn report<'a>(&'a self, update: ProgressUpdate) -> BoxFuture<'a, ()> {
        (self.callback)(update).boxed()
    }
}

/// Bounded channel; a full buffer applies back-pressure to the engine.
pub struct ChannelSink {
    sender: mpsc::Sender<ProgressUpdate>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { sender }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self::new(sender), receiver)
    }
}

impl ProgressSink for ChannelSink {
    fn report<'a>(&'a self, update: ProgressUpdate) -> BoxFuture<'a, ()> {
        async move {
            if self.sender.send(update).await.is_err() {
                debug!("Progress receiver dropped; discarding update");
            }
        }
        .boxed()
    }
}

pub struct LogSink;

impl ProgressSink for LogSink {
    fn report<'a>(&'a self, update: ProgressUpdate) -> BoxFuture<'a, ()> {
        match &update.detail {
            Some(detail) => info!("[{:>3}%] {} ({})", update.percent, update.message, detail),
            None => info!("[{:>3}%] {}", update.percent, update.message),
        }
        futures::future::ready(()).boxed()
    }
}

/// Shared handle recording the latest phase and the full event history.
#[derive(Clone, Default)]
pub struct ProgressStatus {
    inner: Arc<Mutex<ProgressStatusData>>,
}

#[derive(Default)]
struct ProgressStatusData {
    phase: String,
    percent: u8,
    history: Vec<ProgressUpdate>,
}

#[derive(Clone, Debug)]
pub struct ProgressStatusSnapshot {
    pub phase: String,
    pub percent: u8,
    pub history: Vec<ProgressUpdate>,
}

impl ProgressStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn snapshot(&self) -> ProgressStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            ProgressStatusSnapshot {
                phase: data.phase.clone(),
                percent: data.percent,
                history: data.history.clone(),
            }
        } else {
            ProgressStatusSnapshot {
                phase: "Status unavailable".to_string(),
                percent: 0,
                history: Vec::new(),
            }
        }
    }
}

impl ProgressSink for ProgressStatus {
    fn report<'a>(&'a self, update: ProgressUpdate) -> BoxFuture<'a, ()> {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = update.message.clone();
            data.percent = update.percent;
            data.history.push(update);
        }
        futures::future::ready(()).boxed()
    }
}

/// Terminal progress bar for the CLI.
pub struct IndicatifSink {
    bar: ProgressBar,
}

impl IndicatifSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }
}

impl Default for IndicatifSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for IndicatifSink {
    fn report<'a>(&'a self, update: ProgressUpdate) -> BoxFuture<'a, ()> {
        self.bar.set_position(u64::from(update.percent));
        self.bar.set_message(update.message);
        if update.percent >= 100 {
            self.bar.finish();
        }
        futures::future::ready(()).boxed()
    }
}

/// Ordered steps of one simulated day, used to interpolate progress within the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStep {
    Settle = 0,
    Screen = 1,
    Select = 2,
    Allocate = 3,
    FetchIntraday = 4,
    Execute = 5,
    Record = 6,
}

const STEPS_PER_DAY: usize = 7;

/// Turns run position into a non-decreasing percentage and forwards events to a sink.
pub struct ProgressReporter<'a> {
    sink: &'a dyn ProgressSink,
    start_pct: u8,
    end_pct: u8,
    total_days: usize,
    last_percent: u8,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a dyn ProgressSink, start_pct: u8, end_pct: u8, total_days: usize) -> Self {
        let start_pct = start_pct.min(100);
        Self {
            sink,
            start_pct,
            end_pct: end_pct.clamp(start_pct, 100),
            total_days: total_days.max(1),
            last_percent: 0,
        }
    }

    pub fn day_percent(&self, day_index: usize, step: DayStep) -> u8 {
        let total_steps = (self.total_days * STEPS_PER_DAY) as f64;
        let position = (day_index.min(self.total_days) * STEPS_PER_DAY + step as usize) as f64;
        let span = f64::from(self.end_pct - self.start_pct);
        let offset = (span * (position / total_steps).min(1.0)).floor();
        self.start_pct.saturating_add(offset as u8).min(self.end_pct)
    }

    pub async fn day_event(
        &mut self,
        day_index: usize,
        step: DayStep,
        message: impl Into<String>,
        detail: Option<String>,
    ) {
        let percent = self.day_percent(day_index, step);
        self.emit(percent, message, detail).await;
    }

    /// Emits at `percent`, or at the last emitted value if that is higher.
    pub async fn emit(&mut self, percent: u8, message: impl Into<String>, detail: Option<String>) {
        let percent = percent.min(100).max(self.last_percent);
        self.last_percent = percent;
        self.sink
            .report(ProgressUpdate {
                message: message.into(),
                percent,
                detail,
            })
            .await;
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }
}
