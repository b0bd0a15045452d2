//! Async driver for the reconnection state machine
//!
//! A single task owns the [`StreamConsumer`] and executes its commands:
//! each open stream and each reconnect timer runs in its own task that
//! reports back through an input queue, and is cancelled with a
//! [`CancellationToken`] when the state machine closes it.
//! Status and messages are published through `watch` channels.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use helpdesk_store::Message;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConsumerConfig;
use crate::error::ConsumerError;
use crate::state::{Command, ConnectionStatus, StreamConsumer};
use crate::transport::{EventTransport, Timer};

#[derive(Debug)]
enum Control {
    Connect,
    Disconnect,
    Reconnect,
    SetEnabled(bool),
    Visibility(bool),
    Shutdown,
}

enum Input {
    Event {
        generation: u64,
        event: helpdesk_store::StreamEvent,
    },
    Lost {
        generation: u64,
        error: ConsumerError,
    },
    Timer {
        token: u64,
    },
}

/// Handle to a running consumer task
pub struct ConsumerHandle {
    control: mpsc::UnboundedSender<Control>,
    status: watch::Receiver<ConnectionStatus>,
    messages: watch::Receiver<Vec<Message>>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn connect(&self) -> Result<(), ConsumerError> {
        self.send(Control::Connect)
    }

    pub fn disconnect(&self) -> Result<(), ConsumerError> {
        self.send(Control::Disconnect)
    }

    pub fn reconnect(&self) -> Result<(), ConsumerError> {
        self.send(Control::Reconnect)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), ConsumerError> {
        self.send(Control::SetEnabled(enabled))
    }

    /// Report a foreground visibility change of the hosting environment
    pub fn set_visible(&self, visible: bool) -> Result<(), ConsumerError> {
        self.send(Control::Visibility(visible))
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    pub fn messages_receiver(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.clone()
    }

    /// Wait until the status satisfies `predicate`
    pub async fn wait_for_status(
        &self,
        predicate: impl FnMut(&ConnectionStatus) -> bool,
    ) -> Result<ConnectionStatus, ConsumerError> {
        let mut status = self.status.clone();
        let current = status
            .wait_for(predicate)
            .await
            .map_err(|_| ConsumerError::Stopped)?;
        Ok(current.clone())
    }

    /// Disconnect and wait for the consumer task to exit
    pub async fn shutdown(self) {
        let _ = self.control.send(Control::Shutdown);
        let _ = self.task.await;
    }

    fn send(&self, control: Control) -> Result<(), ConsumerError> {
        self.control
            .send(control)
            .map_err(|_| ConsumerError::Stopped)
    }
}

/// Start a consumer task; it stays idle until [`ConsumerHandle::connect`]
pub fn spawn_consumer<T, M>(config: ConsumerConfig, transport: T, timer: M) -> ConsumerHandle
where
    T: EventTransport + 'static,
    M: Timer + 'static,
{
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Idle);
    let (messages_tx, messages_rx) = watch::channel(Vec::new());

    let driver = Driver {
        machine: StreamConsumer::new(config),
        config,
        transport: Arc::new(transport),
        timer: Arc::new(timer),
        inputs_tx,
        connection: None,
        reconnect_timer: None,
        status_tx,
        messages_tx,
        published_revision: 0,
    };
    let task = tokio::spawn(driver.run(control_rx, inputs_rx));

    ConsumerHandle {
        control: control_tx,
        status: status_rx,
        messages: messages_rx,
        task,
    }
}

struct Driver<T, M> {
    machine: StreamConsumer,
    config: ConsumerConfig,
    transport: Arc<T>,
    timer: Arc<M>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    connection: Option<CancellationToken>,
    reconnect_timer: Option<CancellationToken>,
    status_tx: watch::Sender<ConnectionStatus>,
    messages_tx: watch::Sender<Vec<Message>>,
    published_revision: u64,
}

impl<T, M> Driver<T, M>
where
    T: EventTransport + 'static,
    M: Timer + 'static,
{
    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut inputs: mpsc::UnboundedReceiver<Input>,
    ) {
        let mut liveness = tokio::time::interval(self.config.liveness_check_interval());
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let commands = tokio::select! {
                request = control.recv() => match request {
                    Some(Control::Connect) => self.machine.connect(Instant::now()),
                    Some(Control::Disconnect) => self.machine.disconnect(),
                    Some(Control::Reconnect) => self.machine.reconnect(),
                    Some(Control::SetEnabled(enabled)) => {
                        self.machine.set_enabled(enabled, Instant::now())
                    }
                    Some(Control::Visibility(visible)) => {
                        self.machine.on_visibility_change(visible)
                    }
                    Some(Control::Shutdown) | None => {
                        let commands = self.machine.disconnect();
                        self.execute(commands);
                        self.publish();
                        break;
                    }
                },
                Some(input) = inputs.recv() => self.handle_input(input),
                _ = liveness.tick() => self.machine.check_liveness(Instant::now()),
            };
            self.execute(commands);
            self.publish();
        }
        info!("Stream consumer stopped");
    }

    fn handle_input(&mut self, input: Input) -> Vec<Command> {
        match input {
            Input::Event { generation, event } => {
                self.machine.on_event(generation, event, Instant::now());
                Vec::new()
            }
            Input::Lost { generation, error } => match error {
                ConsumerError::Rejected { message, .. } => {
                    self.machine.on_rejected(generation, &message)
                }
                error if error.is_recoverable() => {
                    self.machine.on_transport_error(generation, &error.to_string())
                }
                error => self.machine.on_rejected(generation, &error.to_string()),
            },
            Input::Timer { token } => self.machine.on_timer(token, Instant::now()),
        }
    }

    fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            debug!("Executing {:?}", command);
            match command {
                Command::Open { generation } => self.open(generation),
                Command::Close => {
                    if let Some(connection) = self.connection.take() {
                        connection.cancel();
                    }
                }
                Command::ScheduleReconnect { delay, token } => {
                    if let Some(previous) = self.reconnect_timer.take() {
                        previous.cancel();
                    }
                    let cancel = CancellationToken::new();
                    let cancelled = cancel.clone();
                    let timer = Arc::clone(&self.timer);
                    let inputs = self.inputs_tx.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancelled.cancelled() => {}
                            _ = timer.sleep(delay) => {
                                let _ = inputs.send(Input::Timer { token });
                            }
                        }
                    });
                    self.reconnect_timer = Some(cancel);
                }
                Command::CancelReconnect => {
                    if let Some(timer) = self.reconnect_timer.take() {
                        timer.cancel();
                    }
                }
            }
        }
    }

    fn open(&mut self, generation: u64) {
        if let Some(previous) = self.connection.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();
        let transport = Arc::clone(&self.transport);
        let inputs = self.inputs_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!("Stream {} closed", generation);
                }
                _ = pump(transport, generation, inputs) => {}
            }
        });
        self.connection = Some(cancel);
    }

    fn publish(&mut self) {
        let status = self.machine.status();
        self.status_tx.send_if_modified(|current| {
            if current == status {
                return false;
            }
            *current = status.clone();
            true
        });

        if self.machine.revision() != self.published_revision {
            self.published_revision = self.machine.revision();
            self.messages_tx
                .send_replace(self.machine.messages().to_vec());
        }
    }
}

/// Forward one stream's events until it fails, ends or the driver goes away
async fn pump<T: EventTransport>(
    transport: Arc<T>,
    generation: u64,
    inputs: mpsc::UnboundedSender<Input>,
) {
    let mut events = match transport.open().await {
        Ok(events) => events,
        Err(error) => {
            let _ = inputs.send(Input::Lost { generation, error });
            return;
        }
    };

    while let Some(item) = events.next().await {
        let input = match item {
            Ok(event) => Input::Event { generation, event },
            Err(error) => {
                let _ = inputs.send(Input::Lost { generation, error });
                return;
            }
        };
        if inputs.send(input).is_err() {
            return;
        }
    }

    let _ = inputs.send(Input::Lost {
        generation,
        error: ConsumerError::Transport("stream ended".to_string()),
    });
}
