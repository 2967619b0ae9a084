use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use super::{PageDom, PageInput, STYLESHEET};
use crate::capture::{CaptureOptions, CapturePipeline, CaptureRequest, CaptureTarget, Rasterizer};
use crate::error::{NodeshotError, Result};
use crate::protocol::{Ack, Command, DownloadOutcome};
use crate::relay::RelayHandle;
use crate::selection::{SelectionMachine, SelectionState, SelectionTimings};

/// Error returned to a sender when no selection script is listening.
const NO_RECEIVER: &str = "Could not establish connection. Receiving end does not exist.";

/// Marks a page context as instrumented. Owned by the page-side runtime.
#[derive(Debug, Default)]
pub struct InitToken {
    claimed: bool,
}

impl InitToken {
    /// Claim the token. Only the first call returns true.
    pub fn claim(&mut self) -> bool {
        !std::mem::replace(&mut self.claimed, true)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }
}

/// A unit of code the injector can load into a page context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Reports whether the selection script is already installed.
    Probe,
    Stylesheet,
    Rasterizer,
    SelectionScript,
}

impl Script {
    pub fn name(&self) -> &'static str {
        match self {
            Script::Probe => "probe",
            Script::Stylesheet => "stylesheet",
            Script::Rasterizer => "rasterizer",
            Script::SelectionScript => "selection script",
        }
    }
}

/// Progress of a capture session, published by the page context.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SelectionStarted,
    Cancelled,
    Saved {
        filename: String,
        download_id: u64,
        path: Option<String>,
    },
    Failed {
        code: &'static str,
        message: String,
    },
}

impl SessionEvent {
    /// True for events after which the page is back to `Idle`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionEvent::SelectionStarted)
    }

    fn failed(error: &NodeshotError) -> Self {
        SessionEvent::Failed {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

enum PageMessage {
    Execute {
        script: Script,
        reply: oneshot::Sender<Result<bool>>,
    },
    Command {
        body: String,
        reply: oneshot::Sender<std::result::Result<String, String>>,
    },
    Input(PageInput),
    State {
        reply: oneshot::Sender<Option<SelectionState>>,
    },
}

/// Sender side of a page context. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PageHandle {
    id: String,
    tx: mpsc::UnboundedSender<PageMessage>,
    events: broadcast::Sender<SessionEvent>,
}

impl PageHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run one script in the page. Returns true when it changed the page.
    pub async fn execute(&self, script: Script) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.post(PageMessage::Execute { script, reply })?;
        rx.await.map_err(|_| closed())?
    }

    /// Send one command and wait for its single response.
    pub async fn send_command(&self, command: &Command) -> Result<Ack> {
        let body = serde_json::to_string(command)?;
        tracing::debug!("-> page {}: {}", self.id, body);

        let (reply, rx) = oneshot::channel();
        self.post(PageMessage::Command { body, reply })?;
        let response = rx
            .await
            .map_err(|_| closed())?
            .map_err(NodeshotError::CommunicationFailure)?;

        tracing::debug!("<- page {}: {}", self.id, response);
        serde_json::from_str(&response).map_err(|e| {
            NodeshotError::CommunicationFailure(format!("Malformed response: {}", e))
        })
    }

    /// Deliver DOM input observed by the page's listeners.
    pub fn dispatch_input(&self, input: PageInput) -> Result<()> {
        self.post(PageMessage::Input(input))
    }

    /// Current selection state, or `None` before the selection script is loaded.
    pub async fn selection_state(&self) -> Result<Option<SelectionState>> {
        let (reply, rx) = oneshot::channel();
        self.post(PageMessage::State { reply })?;
        rx.await.map_err(|_| closed())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn post(&self, message: PageMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| closed())
    }
}

fn closed() -> NodeshotError {
    NodeshotError::CommunicationFailure("Page context is gone".to_string())
}

/// The page-side runtime: one cooperative loop per page.
pub struct PageContext {
    dom: Arc<dyn PageDom>,
    relay: RelayHandle,
    timings: SelectionTimings,
    token: InitToken,
    stylesheet_loaded: bool,
    /// Rasterizer shipped with the host, loaded on demand by the injector.
    rasterizer_asset: Option<Arc<dyn Rasterizer>>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    machine: Option<SelectionMachine>,
    events: broadcast::Sender<SessionEvent>,
}

impl PageContext {
    pub fn new(dom: Arc<dyn PageDom>, relay: RelayHandle) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            dom,
            relay,
            timings: SelectionTimings::default(),
            token: InitToken::default(),
            stylesheet_loaded: false,
            rasterizer_asset: None,
            rasterizer: None,
            machine: None,
            events,
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer_asset = Some(rasterizer);
        self
    }

    pub fn with_timings(mut self, timings: SelectionTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Start the page loop and return its handle.
    pub fn spawn(self, id: impl Into<String>) -> PageHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = PageHandle {
            id: id.into(),
            tx,
            events: self.events.clone(),
        };
        tokio::spawn(self.run(rx));
        handle
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PageMessage>) {
        loop {
            let deadline = self.machine.as_ref().and_then(|m| m.notice_deadline());
            let message = match deadline {
                Some(at) => tokio::select! {
                    message = rx.recv() => message,
                    _ = tokio::time::sleep_until(at) => {
                        if let Some(machine) = self.machine.as_mut() {
                            machine.dismiss_notice().await;
                        }
                        continue;
                    }
                },
                None => rx.recv().await,
            };

            let Some(message) = message else { break };
            match message {
                PageMessage::Execute { script, reply } => {
                    let _ = reply.send(self.execute(script).await);
                }
                PageMessage::Command { body, reply } => self.on_command(body, reply).await,
                PageMessage::Input(input) => self.on_input(input).await,
                PageMessage::State { reply } => {
                    let _ = reply.send(self.machine.as_ref().map(|m| m.state()));
                }
            }
        }
        tracing::debug!("Page context loop ended");
    }

    async fn execute(&mut self, script: Script) -> Result<bool> {
        match script {
            Script::Probe => Ok(self.token.is_claimed()),
            Script::Stylesheet => {
                if self.stylesheet_loaded {
                    return Ok(false);
                }
                self.dom.insert_stylesheet(STYLESHEET).await?;
                self.stylesheet_loaded = true;
                Ok(true)
            }
            Script::Rasterizer => {
                if self.rasterizer.is_some() {
                    return Ok(false);
                }
                let asset = self.rasterizer_asset.clone().ok_or_else(|| {
                    NodeshotError::InjectionFailure("rasterizer asset is unavailable".to_string())
                })?;
                self.rasterizer = Some(asset);
                Ok(true)
            }
            Script::SelectionScript => {
                if self.token.is_claimed() {
                    return Ok(false);
                }
                self.dom.install_input_bridge().await?;
                self.token.claim();
                self.machine = Some(SelectionMachine::new(Arc::clone(&self.dom), self.timings));
                tracing::debug!("Selection script installed");
                Ok(true)
            }
        }
    }

    async fn on_command(
        &mut self,
        body: String,
        reply: oneshot::Sender<std::result::Result<String, String>>,
    ) {
        let Some(machine) = self.machine.as_mut() else {
            let _ = reply.send(Err(NO_RECEIVER.to_string()));
            return;
        };

        let command: Command = match serde_json::from_str(&body) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Ignoring malformed command: {}", e);
                let _ = reply.send(respond(Ack::failed(format!("Malformed command: {}", e))));
                return;
            }
        };

        if !machine.is_idle() {
            let _ = reply.send(respond(Ack::busy()));
            return;
        }
        match machine.reserve().await {
            Ok(()) => {}
            Err(NodeshotError::SessionBusy) => {
                tracing::info!("Document is already in a session owned by another context");
                let _ = reply.send(respond(Ack::busy()));
                return;
            }
            Err(e) => {
                let _ = reply.send(respond(Ack::failed(e.to_string())));
                return;
            }
        }

        match command {
            Command::StartSelection { options } => match machine.start(options).await {
                Ok(()) => {
                    let _ = reply.send(respond(Ack::ok()));
                    self.publish(SessionEvent::SelectionStarted);
                }
                Err(e) => {
                    let _ = reply.send(respond(Ack::failed(e.to_string())));
                    self.publish(SessionEvent::failed(&e));
                }
            },
            Command::CaptureBySelector { selector, options } => {
                // Acknowledge first; the lookup and capture continue in the page.
                let _ = reply.send(respond(Ack::ok()));
                self.process(CaptureRequest {
                    target: CaptureTarget::Selector(selector),
                    options,
                })
                .await;
            }
        }
    }

    async fn on_input(&mut self, input: PageInput) {
        let Some(machine) = self.machine.as_mut() else {
            return;
        };

        match input {
            PageInput::PointerMove { target } => {
                if let Err(e) = machine.pointer_move(target).await {
                    tracing::debug!("Pointer move on {} ignored: {}", target, e);
                }
            }
            PageInput::Click { target } => {
                if let Some(request) = machine.click(target).await {
                    self.process(request).await;
                }
            }
            PageInput::Key { key } => {
                if machine.key(&key).await {
                    self.publish(SessionEvent::Cancelled);
                }
            }
        }
    }

    /// Run one capture request to completion. Always leaves the machine `Idle`.
    async fn process(&mut self, request: CaptureRequest) {
        let Some(machine) = self.machine.as_mut() else {
            return;
        };

        let element = match request.target {
            CaptureTarget::Element(element) => element,
            CaptureTarget::Selector(selector) => match machine.resolve_selector(&selector).await {
                Ok(element) => element,
                Err(e) => {
                    tracing::warn!("Selector capture failed: {}", e);
                    self.publish(SessionEvent::failed(&e));
                    return;
                }
            },
        };

        machine.begin_capture().await;
        let pipeline = CapturePipeline::new(Arc::clone(&self.dom), self.rasterizer.clone());
        let outcome = capture_and_deliver(&pipeline, &self.relay, element, &request.options).await;
        machine.finish_capture(&outcome).await;

        match outcome {
            Ok(event) => self.publish(event),
            Err(e) => {
                tracing::warn!("Capture of {} failed: {}", element, e);
                self.publish(SessionEvent::failed(&e));
            }
        }
    }

    fn publish(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

async fn capture_and_deliver(
    pipeline: &CapturePipeline,
    relay: &RelayHandle,
    element: super::ElementRef,
    options: &CaptureOptions,
) -> Result<SessionEvent> {
    let result = pipeline.capture_element(element, options).await?;
    match relay.deliver(&result).await? {
        DownloadOutcome::Saved { id, path } => Ok(SessionEvent::Saved {
            filename: result.filename,
            download_id: id,
            path,
        }),
        DownloadOutcome::Failed { error } => Err(NodeshotError::DownloadFailure(error)),
    }
}

fn respond(ack: Ack) -> std::result::Result<String, String> {
    serde_json::to_string(&ack).map_err(|e| e.to_string())
}
