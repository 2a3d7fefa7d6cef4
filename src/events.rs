use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};
use tokio::sync::{
    broadcast::{self, error::RecvError, error::TryRecvError},
    watch,
};

use crate::telemetry::Telemetry;

/// Everything a backend publishes to its observers, in production order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Telemetry(Telemetry),
    Transition(Transition),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub temperature: f64,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionKind {
    AlarmRaised,
    AlarmCleared,
    InterlockEngaged,
    InterlockReleased,
    EmergencyStop,
    SystemReset,
    SetpointChanged { setpoint: f64 },
}

/// Producer side of a device's notification path.
///
/// Keeps the last published telemetry and fans events out to subscribers. Every
/// subscriber owns a bounded queue; one that falls behind loses its oldest events
/// rather than holding up the producer.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<Inner>,
}

struct Inner {
    last: watch::Sender<Option<Telemetry>>,
    events: broadcast::Sender<Event>,
}

/// Consumer side, obtained from [`Publisher::subscribe`].
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
}

impl Publisher {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        let (last, _) = watch::channel(None);
        let (events, _) = broadcast::channel(capacity.max(1));

        Self {
            inner: Arc::new(Inner { last, events }),
        }
    }

    /// Publishes a snapshot and returns it as published. The capture time is
    /// raised to the previous snapshot's if the wall clock stepped backwards.
    pub fn publish(&self, mut telemetry: Telemetry) -> Telemetry {
        // Both updates happen under the watch lock so that the broadcast order
        // always matches the order of `last`.
        self.inner.last.send_modify(|last| {
            if let Some(previous) = last {
                if telemetry.captured_at < previous.captured_at {
                    telemetry.captured_at = previous.captured_at;
                }
            }

            *last = Some(telemetry.clone());
            let _ = self.inner.events.send(Event::Telemetry(telemetry.clone()));
        });

        telemetry
    }

    pub fn transition(&self, kind: TransitionKind, temperature: f64) {
        let transition = Transition {
            kind,
            temperature,
            at: Utc::now(),
        };

        transition.log();

        self.inner.last.send_modify(|_| {
            let _ = self.inner.events.send(Event::Transition(transition));
        });
    }

    pub fn last(&self) -> Option<Telemetry> {
        self.inner.last.borrow().clone()
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.inner.events.subscribe(),
        }
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl Subscription {
    /// Waits for the next event. Returns `None` once the device has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber fell behind, {skipped} events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber fell behind, {skipped} events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Waits for the next telemetry snapshot, skipping transitions.
    pub async fn next_telemetry(&mut self) -> Option<Telemetry> {
        loop {
            if let Event::Telemetry(telemetry) = self.recv().await? {
                return Some(telemetry);
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
    }
}

impl Transition {
    /// Alarm and interlock edges between two consecutive snapshots.
    pub fn between(previous: &Telemetry, next: &Telemetry) -> Vec<TransitionKind> {
        let mut kinds = Vec::new();

        match (previous.alarm_active, next.alarm_active) {
            (false, true) => kinds.push(TransitionKind::AlarmRaised),
            (true, false) => kinds.push(TransitionKind::AlarmCleared),
            _ => {}
        }

        match (
            previous.critical_interlock_active,
            next.critical_interlock_active,
        ) {
            (false, true) => kinds.push(TransitionKind::InterlockEngaged),
            (true, false) => kinds.push(TransitionKind::InterlockReleased),
            _ => {}
        }

        kinds
    }

    fn log(&self) {
        let temperature = self.temperature;

        match &self.kind {
            TransitionKind::InterlockEngaged | TransitionKind::EmergencyStop => {
                tracing::error!(temperature, "{self}")
            }
            TransitionKind::AlarmRaised => tracing::warn!(temperature, "{self}"),
            _ => tracing::info!(temperature, "{self}"),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TransitionKind::AlarmRaised => write!(f, "Alarm raised"),
            TransitionKind::AlarmCleared => write!(f, "Alarm cleared"),
            TransitionKind::InterlockEngaged => write!(f, "Critical interlock engaged"),
            TransitionKind::InterlockReleased => write!(f, "Critical interlock released"),
            TransitionKind::EmergencyStop => write!(f, "Emergency stop"),
            TransitionKind::SystemReset => write!(f, "System reset"),
            TransitionKind::SetpointChanged { setpoint } => {
                write!(f, "Setpoint changed to {setpoint:.1}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn test_publish_order() {
        let publisher = Publisher::new(8);
        let mut subscription = publisher.subscribe();

        for temperature in [1., 2., 3.] {
            publisher.publish(Telemetry {
                current_temperature: temperature,
                ..Default::default()
            });
        }

        let received: Vec<_> = std::iter::from_fn(|| subscription.try_recv())
            .map(|event| match event {
                Event::Telemetry(t) => t.current_temperature,
                Event::Transition(_) => panic!("Unexpected transition"),
            })
            .collect();

        assert_eq!(received, [1., 2., 3.]);
        assert_eq!(publisher.last().unwrap().current_temperature, 3.);
    }

    #[test]
    fn test_monotonic_timestamps() {
        let publisher = Publisher::default();
        let now = Utc::now();

        publisher.publish(Telemetry::default().with_captured_at(now));
        let published =
            publisher.publish(Telemetry::default().with_captured_at(now - TimeDelta::seconds(5)));

        assert_eq!(published.captured_at, now);
    }

    #[test]
    fn test_slow_subscriber_drops_oldest() {
        let publisher = Publisher::new(2);
        let mut subscription = publisher.subscribe();

        for temperature in [1., 2., 3., 4.] {
            publisher.publish(Telemetry {
                current_temperature: temperature,
                ..Default::default()
            });
        }

        let received: Vec<_> = std::iter::from_fn(|| subscription.try_recv()).collect();

        assert_eq!(received.len(), 2);
        assert!(matches!(&received[0], Event::Telemetry(t) if t.current_temperature == 3.));
    }

    #[test]
    fn test_transitions_between() {
        let calm = Telemetry::default();
        let tripped = Telemetry {
            alarm_active: true,
            critical_interlock_active: true,
            ..Default::default()
        };

        assert_eq!(
            Transition::between(&calm, &tripped),
            [TransitionKind::AlarmRaised, TransitionKind::InterlockEngaged]
        );
        assert_eq!(
            Transition::between(&tripped, &calm),
            [TransitionKind::AlarmCleared, TransitionKind::InterlockReleased]
        );
        assert!(Transition::between(&calm, &calm).is_empty());
    }
}
