use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::modules::realtime::service::Subscription;

/// Where the audio cue actually goes. Playback is a UI concern; the
/// default sink only logs.
pub trait NotificationSink: Send + Sync {
    fn cue(&self);
}

pub struct LogSink;

impl NotificationSink for LogSink {
    fn cue(&self) {
        log::debug!("Notification cue");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeAdvance {
    /// No stored baseline yet; record only, never cue.
    First,
    Advanced,
    Stale,
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Session-scoped notification state: per-chat message-count baselines for
/// open chat views, per-chat last-message-time baselines for the global
/// listener, and the single active global subscription. Created on login,
/// cleared on logout; nothing here survives the session.
pub struct Notifier {
    enabled: AtomicBool,
    sink: RwLock<Arc<dyn NotificationSink>>,
    chat_counts: Mutex<HashMap<String, Option<usize>>>,
    chat_times: Mutex<HashMap<String, DateTime<Utc>>>,
    global: Mutex<Option<Subscription>>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Notifier {
            enabled: AtomicBool::new(true),
            sink: RwLock::new(sink),
            chat_counts: Mutex::new(HashMap::new()),
            chat_times: Mutex::new(HashMap::new()),
            global: Mutex::new(None),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, AtomicOrdering::SeqCst);
    }

    /// Swap the cue target; custom sound and volume live behind the sink.
    pub fn set_sink(&self, sink: Arc<dyn NotificationSink>) {
        *self.sink.write().unwrap_or_else(|e| e.into_inner()) = sink;
    }

    pub fn cue(&self) {
        if !self.enabled.load(AtomicOrdering::SeqCst) {
            return;
        }
        self.sink.read().unwrap_or_else(|e| e.into_inner()).cue();
    }

    pub(crate) fn init_chat(&self, chat_id: &str) {
        lock(&self.chat_counts).entry(chat_id.to_string()).or_insert(None);
    }

    /// Record a delivered message list and cue when it grew past the
    /// stored baseline and the newest message came from someone else.
    /// Returns whether the cue fired.
    pub(crate) fn note_messages(
        &self,
        chat_id: &str,
        count: usize,
        newest_sender: Option<&str>,
        viewer: Option<&str>,
    ) -> bool {
        let previous =
            lock(&self.chat_counts).insert(chat_id.to_string(), Some(count)).flatten();

        let grew = matches!(previous, Some(prev) if count > prev);
        let from_other = matches!((newest_sender, viewer), (Some(s), Some(v)) if s != v);
        if grew && from_other {
            self.cue();
            return true;
        }
        false
    }

    pub(crate) fn observe_time(&self, chat_id: &str, time: DateTime<Utc>) -> TimeAdvance {
        let mut times = lock(&self.chat_times);
        match times.get(chat_id) {
            None => {
                times.insert(chat_id.to_string(), time);
                TimeAdvance::First
            }
            Some(stored) if time > *stored => {
                times.insert(chat_id.to_string(), time);
                TimeAdvance::Advanced
            }
            Some(_) => TimeAdvance::Stale,
        }
    }

    pub(crate) fn record_time(&self, chat_id: &str, time: DateTime<Utc>) {
        lock(&self.chat_times).insert(chat_id.to_string(), time);
    }

    /// Replace the active global subscription; the previous one is
    /// disposed by drop.
    pub(crate) fn set_global(&self, subscription: Subscription) {
        *lock(&self.global) = Some(subscription);
    }

    pub fn stop_global(&self) {
        if lock(&self.global).take().is_some() {
            log::info!("Global notifications stopped");
        }
    }

    /// Logout teardown: drop the global subscription and every baseline.
    pub fn clear(&self) {
        self.stop_global();
        lock(&self.chat_counts).clear();
        lock(&self.chat_times).clear();
    }
}
