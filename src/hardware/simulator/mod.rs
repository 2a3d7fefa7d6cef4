use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    select,
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

use crate::{
    config::{DeviceConfig, SimulationConfig},
    error::{DeviceError, Result},
    events::{Publisher, Subscription},
    protocol::{Command, CommandError},
    telemetry::Telemetry,
};

use super::Device;

mod furnace;

pub use furnace::{Cycle, Furnace, Outcome};

const NAME: &str = "simulator";
const REQUEST_QUEUE: usize = 8;

/// Development backend driven by the [`Furnace`] model.
///
/// The model lives inside the control task while the device runs and is parked in
/// the device while it is stopped, so a restart resumes where it left off.
pub struct SimulatedDevice {
    inner: Arc<Inner>,
}

struct Inner {
    params: SimulationConfig,
    strict: bool,
    publisher: Publisher,
    running: AtomicBool,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    parked: Option<Furnace>,
    task: Option<ControlTask>,
}

struct ControlTask {
    requests: mpsc::Sender<Request>,
    handle: JoinHandle<Furnace>,
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Option<&'static str>>,
}

impl SimulatedDevice {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                params: config.simulation.clone(),
                strict: config.strict_commands,
                publisher: Publisher::new(config.subscriber_capacity),
                running: AtomicBool::new(false),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /* == Control task == */

    #[tracing::instrument(name = "simulator", skip_all)]
    async fn control_task(
        mut furnace: Furnace,
        publisher: Publisher,
        period: Duration,
        mut requests: mpsc::Receiver<Request>,
    ) -> Furnace {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = timer.tick() => {
                    let Cycle { telemetry, transitions } = furnace.step();
                    let temperature = telemetry.current_temperature;

                    tracing::trace!(temperature, state = %telemetry.state_label, "Cycle");
                    publisher.publish(telemetry);

                    for kind in transitions {
                        publisher.transition(kind, temperature);
                    }
                }

                request = requests.recv() => {
                    let Some(Request { command, reply }) = request else {
                        break;
                    };

                    let outcome = furnace.execute(&command);

                    let ack = outcome.map(|Outcome { ack, transition }| {
                        if let Some(kind) = transition {
                            publisher.transition(kind, furnace.temperature());
                        }

                        ack
                    });

                    let _ = reply.send(ack);
                }
            }
        }

        furnace
    }

    /// Acknowledgement for a command the simulator does not implement.
    fn unsupported(&self, command: &str) -> Result<String> {
        if self.inner.strict {
            Err(DeviceError::UnknownCommand(command.to_owned()))
        } else {
            tracing::debug!("Ignoring unsupported command \"{command}\"");
            Ok("OK".to_owned())
        }
    }
}

#[async_trait]
impl Device for SimulatedDevice {
    async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;

        if state.task.is_some() {
            return Ok(());
        }

        let furnace = state
            .parked
            .take()
            .unwrap_or_else(|| Furnace::new(self.inner.params.clone()));

        let (requests, rx) = mpsc::channel(REQUEST_QUEUE);

        let handle = tokio::spawn(Self::control_task(
            furnace,
            self.inner.publisher.clone(),
            self.inner.params.period(),
            rx,
        ));

        state.task = Some(ControlTask { requests, handle });
        self.inner.running.store(true, Ordering::Release);

        tracing::info!("Simulator started, {} ms period", self.inner.params.period_ms);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;

        let Some(ControlTask { requests, handle }) = state.task.take() else {
            return Ok(());
        };

        self.inner.running.store(false, Ordering::Release);

        // Closing the channel ends the task once in-flight requests are answered
        drop(requests);

        match handle.await {
            Ok(furnace) => state.parked = Some(furnace),
            Err(e) => tracing::warn!("Simulator task ended abnormally: {e}"),
        }

        tracing::info!("Simulator stopped");
        Ok(())
    }

    async fn send(&self, command: &str) -> Result<String> {
        let requests = match &self.inner.state.lock().await.task {
            Some(task) => task.requests.clone(),
            None => return Err(DeviceError::NotRunning),
        };

        if command.trim().contains(['\n', '\r']) {
            return Err(DeviceError::InvalidCommand(command.to_owned()));
        }

        tracing::debug!("Received command \"{}\"", command.trim());

        let parsed = match command.parse::<Command>() {
            Ok(parsed) => parsed,
            Err(CommandError::InvalidArgument {
                keyword: "SET_TEMP" | "SET_SP",
                ..
            }) => return Ok("SETPOINT_ERROR".to_owned()),
            Err(_) => return self.unsupported(command.trim()),
        };

        let (reply, ack) = oneshot::channel();

        requests
            .send(Request {
                command: parsed,
                reply,
            })
            .await
            .map_err(|_| DeviceError::NotRunning)?;

        match ack.await.map_err(|_| DeviceError::NotRunning)? {
            Some(ack) => Ok(ack.to_owned()),
            None => self.unsupported(command.trim()),
        }
    }

    fn last_telemetry(&self) -> Option<Telemetry> {
        self.inner.publisher.last()
    }

    fn subscribe(&self) -> Subscription {
        self.inner.publisher.subscribe()
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

impl fmt::Display for SimulatedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NAME}")
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.try_lock() {
            if let Some(task) = state.task.take() {
                task.handle.abort();
            }
        }
    }
}
