//! Bluetooth Service Module
//!
//! Main service that owns the connection state machine and runs the report
//! pipeline for one controller:
//!
//! ```text
//! transport ─bytes─▶ decode_report ─state─▶ EdgeDetector ─events─▶ InputDispatcher ─▶ keyboard
//! ```
//!
//! The service only suspends while waiting for a scan result, a connection,
//! the next notification, or a retry backoff. Commands are observed at each
//! of those points.

use crate::domain::connection::{ConnectionStateMachine, ConnectionTrigger, RetryPolicy};
use crate::domain::dispatcher::{InputDispatcher, KeyboardSink};
use crate::domain::edge::EdgeDetector;
use crate::domain::mapping::MappingTable;
use crate::domain::models::{
    AppEvent, ConnectionState, MessageSeverity, ScannedDevice, StatusMessage,
};
use crate::domain::settings::Settings;
use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::scanner::{scan_for_controller, ControllerMatcher};
use crate::infrastructure::bluetooth::transport::{
    Advertisement, BleTransport, NotificationReceiver, TransportError,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Runtime parameters of the bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub input_characteristic: Uuid,
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
    pub queue_capacity: usize,
    pub dead_zone: f32,
    pub name_hint: Option<String>,
    pub retry: RetryPolicy,
    /// Log raw reports whenever the button bytes change
    pub raw_report_logging: bool,
}

impl BridgeConfig {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        settings.validate()?;
        Ok(Self {
            input_characteristic: settings.input_char_uuid()?,
            scan_timeout: Duration::from_millis(settings.scan_timeout_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            queue_capacity: settings.notification_queue_capacity,
            dead_zone: settings.stick_dead_zone,
            name_hint: settings.device_name_hint.clone(),
            retry: settings.retry_policy(),
            raw_report_logging: settings.debug_raw_data_logging,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    Start,
    Stop,
    /// Stop and leave the run loop
    Shutdown,
}

/// Cloneable control handle for a spawned service
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    commands: mpsc::UnboundedSender<BridgeCommand>,
}

impl BridgeHandle {
    pub fn start(&self) {
        self.send(BridgeCommand::Start);
    }

    pub fn stop(&self) {
        self.send(BridgeCommand::Stop);
    }

    pub fn shutdown(&self) {
        self.send(BridgeCommand::Shutdown);
    }

    fn send(&self, command: BridgeCommand) {
        if self.commands.send(command).is_err() {
            debug!("Bridge already shut down, dropping {:?}", command);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SessionStats {
    received: u64,
    dropped: u64,
}

enum Step<D> {
    Command(Option<BridgeCommand>),
    Scanned(BridgeResult<Advertisement<D>>),
    Opened(BridgeResult<NotificationReceiver>),
    Notification(Option<Vec<u8>>),
    RetryElapsed,
}

pub struct BridgeService<T: BleTransport, K> {
    transport: T,
    dispatcher: InputDispatcher<K>,
    detector: EdgeDetector,
    machine: ConnectionStateMachine,
    matcher: ControllerMatcher,
    config: BridgeConfig,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    device: Option<T::Device>,
    notifications: Option<NotificationReceiver>,
    last_button_bytes: Option<[u8; 3]>,
    stats: SessionStats,
}

impl<T, K> BridgeService<T, K>
where
    T: BleTransport,
    K: KeyboardSink + Send,
{
    pub fn new(
        transport: T,
        keyboard: K,
        table: MappingTable,
        config: BridgeConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            transport,
            dispatcher: InputDispatcher::new(table, keyboard),
            detector: EdgeDetector::new(config.dead_zone),
            machine: ConnectionStateMachine::new(config.retry),
            matcher: ControllerMatcher::new(config.name_hint.clone()),
            config,
            event_sender,
            device: None,
            notifications: None,
            last_button_bytes: None,
            stats: SessionStats::default(),
        }
    }

    /// Run the service on its own task
    pub fn spawn(mut self) -> (BridgeHandle, JoinHandle<()>)
    where
        T: 'static,
        K: 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            self.run(&mut rx).await;
        });
        (BridgeHandle { commands: tx }, task)
    }

    /// Process commands and the connection until shutdown or until every
    /// command sender is gone
    pub async fn run(&mut self, commands: &mut mpsc::UnboundedReceiver<BridgeCommand>) {
        loop {
            let state = self.machine.state();
            let step = match state {
                _ if self.machine.is_idle() => Step::Command(commands.recv().await),
                ConnectionState::Scanning => tokio::select! {
                    cmd = commands.recv() => Step::Command(cmd),
                    found = scan_for_controller(
                        &mut self.transport,
                        &self.matcher,
                        self.config.scan_timeout,
                    ) => Step::Scanned(found),
                },
                ConnectionState::Connecting => tokio::select! {
                    cmd = commands.recv() => Step::Command(cmd),
                    opened = self.open_session() => Step::Opened(opened),
                },
                ConnectionState::Subscribed | ConnectionState::Streaming => tokio::select! {
                    cmd = commands.recv() => Step::Command(cmd),
                    bytes = next_notification(&mut self.notifications) => Step::Notification(bytes),
                },
                ConnectionState::Error | ConnectionState::Disconnected => {
                    let delay = self.machine.next_retry_delay().unwrap_or_default();
                    tokio::select! {
                        cmd = commands.recv() => Step::Command(cmd),
                        _ = tokio::time::sleep(delay) => Step::RetryElapsed,
                    }
                }
            };

            if !self.handle_step(step).await {
                break;
            }
        }
        self.release_keys();
        debug!("Bridge service stopped");
    }

    async fn handle_step(&mut self, step: Step<T::Device>) -> bool {
        match step {
            Step::Command(Some(BridgeCommand::Start)) => {
                if self.machine.is_idle() {
                    info!("Starting bridge");
                    self.transition(ConnectionTrigger::Start).await;
                } else {
                    debug!("Start ignored, bridge is {}", self.machine.state());
                }
            }
            Step::Command(Some(BridgeCommand::Stop)) => self.stop().await,
            Step::Command(Some(BridgeCommand::Shutdown)) | Step::Command(None) => {
                self.stop().await;
                return false;
            }
            Step::Scanned(Ok(adv)) => {
                self.emit(AppEvent::DeviceFound(ScannedDevice {
                    name: adv.local_name.clone().unwrap_or_else(|| "Unknown".to_string()),
                    address: adv.address.clone(),
                    signal_strength: adv.rssi,
                }));
                self.device = Some(adv.device);
                self.transition(ConnectionTrigger::DeviceFound).await;
            }
            Step::Scanned(Err(BridgeError::DeviceNotFound { timeout_ms })) => {
                info!("No controller within {} ms", timeout_ms);
                self.emit(AppEvent::DeviceNotFound);
                self.send_log(
                    "Controller not found. Make sure it is on, in range and not paired to a console.",
                    MessageSeverity::Warning,
                );
                self.transition(ConnectionTrigger::ScanTimeout).await;
            }
            Step::Scanned(Err(e)) => self.fail(e).await,
            Step::Opened(Ok(receiver)) => {
                self.notifications = Some(receiver);
                self.stats = SessionStats::default();
                self.last_button_bytes = None;
                self.transition(ConnectionTrigger::Subscribed).await;
            }
            Step::Opened(Err(e)) => self.fail(e).await,
            Step::Notification(Some(bytes)) => self.process_report(&bytes).await,
            Step::Notification(None) => self.fail(TransportError::Disconnected.into()).await,
            Step::RetryElapsed => {
                self.release_keys();
                info!("Retrying (attempt {})", self.machine.failures() + 1);
                self.transition(ConnectionTrigger::RetryElapsed).await;
            }
        }
        true
    }

    async fn open_session(&mut self) -> BridgeResult<NotificationReceiver> {
        let device = self
            .device
            .clone()
            .ok_or(BridgeError::Transport(TransportError::Disconnected))?;

        info!("Connecting to {:?}...", device);
        tokio::time::timeout(self.config.connect_timeout, self.transport.connect(&device))
            .await
            .map_err(|_| {
                TransportError::ConnectTimeout(self.config.connect_timeout.as_millis() as u64)
            })??;

        let receiver = self
            .transport
            .subscribe(
                &device,
                self.config.input_characteristic,
                self.config.queue_capacity,
            )
            .await?;
        self.send_log("Connection established!", MessageSeverity::Success);
        Ok(receiver)
    }

    /// Decode, diff and dispatch one report. Malformed reports are dropped
    /// and leave the baseline untouched.
    async fn process_report(&mut self, bytes: &[u8]) {
        self.stats.received += 1;

        if self.config.raw_report_logging {
            let current = protocol::button_bytes(bytes);
            if current != self.last_button_bytes {
                self.last_button_bytes = current;
                info!("[{:5}] {}", self.stats.received, protocol::describe_report(bytes));
            }
        }

        let state = match protocol::decode_report(bytes) {
            Ok(state) => state,
            Err(e) => {
                self.stats.dropped += 1;
                debug!("Dropping report: {}", e);
                return;
            }
        };

        if self.machine.state() == ConnectionState::Subscribed {
            self.transition(ConnectionTrigger::ReportDecoded).await;
        }

        trace!("{}", state);
        for event in self.detector.update(state) {
            if let Err(e) = self.dispatcher.dispatch(event) {
                warn!("Failed to dispatch {:?}: {}", event, e);
            }
        }
    }

    async fn fail(&mut self, err: BridgeError) {
        warn!("{}", err);
        self.send_log(err.to_string(), MessageSeverity::Error);
        self.transition(ConnectionTrigger::TransportFailure).await;

        match self.machine.next_retry_delay() {
            Some(delay) => info!("Retrying in {} ms", delay.as_millis()),
            None => {
                let failures = self.machine.failures();
                error!("Giving up after {} failed attempt(s)", failures);
                self.emit(AppEvent::RetriesExhausted { failures });
            }
        }
    }

    async fn stop(&mut self) {
        if self.machine.state() != ConnectionState::Disconnected {
            info!("Stopping bridge");
            self.transition(ConnectionTrigger::Stop).await;
        }
    }

    /// The only place the connection state changes. Keys are released and
    /// the session torn down before the new state is announced.
    async fn transition(&mut self, trigger: ConnectionTrigger) {
        let change = match self.machine.apply(trigger) {
            Ok(change) => change,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };

        if change.release_keys {
            self.release_keys();
            self.detector.reset();
            self.teardown(change.from).await;
        }

        if change.from != change.to {
            info!("Connection state: {} -> {}", change.from, change.to);
            self.emit(AppEvent::ConnectionState(change.to));
        }
    }

    fn release_keys(&mut self) {
        let released = self.dispatcher.release_all();
        if released > 0 {
            info!("Released {} held key(s)", released);
        }
        let stuck = self.dispatcher.pressed_keys().count();
        if stuck > 0 {
            warn!("{} key(s) still held, retrying on the next sweep", stuck);
        }
    }

    async fn teardown(&mut self, from: ConnectionState) {
        if from == ConnectionState::Scanning {
            if let Err(e) = self.transport.stop_scan().await {
                debug!("Failed to stop scan: {}", e);
            }
        }

        self.notifications = None;
        if let Some(device) = self.device.take() {
            if let Err(e) = self.transport.disconnect(&device).await {
                warn!("Failed to disconnect cleanly: {}", e);
            }
        }

        if self.stats.received > 0 {
            info!(
                "Session ended: {} report(s) received, {} dropped",
                self.stats.received, self.stats.dropped
            );
            self.stats = SessionStats::default();
        }
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.event_sender.send(event);
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        self.emit(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }
}

async fn next_notification(receiver: &mut Option<NotificationReceiver>) -> Option<Vec<u8>> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mapping::Key;
    use crate::domain::dispatcher::testing::{KeyAction, RecordingKeyboard};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    const WAIT: Duration = Duration::from_secs(2);

    type Senders = Arc<Mutex<Vec<mpsc::Sender<Vec<u8>>>>>;

    #[derive(Default)]
    struct MockTransport {
        advertisements: Vec<Advertisement<u32>>,
        pending: VecDeque<Advertisement<u32>>,
        hang_scan: bool,
        /// Scans that see nothing before the advertisements show up
        empty_scans: u32,
        connect_failures: u32,
        senders: Senders,
        calls: Arc<Mutex<Vec<&'static str>>>,
        keyboard: RecordingKeyboard,
        keys_at_disconnect: Arc<Mutex<Option<Vec<KeyAction>>>>,
    }

    impl MockTransport {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl BleTransport for MockTransport {
        type Device = u32;

        async fn start_scan(&mut self) -> Result<(), TransportError> {
            self.record("start_scan");
            if self.empty_scans > 0 {
                self.empty_scans -= 1;
                self.pending.clear();
            } else {
                self.pending = self.advertisements.iter().cloned().collect();
            }
            Ok(())
        }

        async fn next_advertisement(
            &mut self,
        ) -> Result<Option<Advertisement<u32>>, TransportError> {
            if self.hang_scan {
                std::future::pending::<()>().await;
            }
            Ok(self.pending.pop_front())
        }

        async fn stop_scan(&mut self) -> Result<(), TransportError> {
            self.record("stop_scan");
            Ok(())
        }

        async fn connect(&mut self, _device: &u32) -> Result<(), TransportError> {
            self.record("connect");
            if self.connect_failures > 0 {
                self.connect_failures -= 1;
                return Err(TransportError::Connect("link refused".to_string()));
            }
            Ok(())
        }

        async fn subscribe(
            &mut self,
            _device: &u32,
            characteristic: Uuid,
            capacity: usize,
        ) -> Result<NotificationReceiver, TransportError> {
            assert_eq!(characteristic, protocol::input_char_uuid());
            self.record("subscribe");
            let (tx, rx) = mpsc::channel(capacity);
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }

        async fn disconnect(&mut self, _device: &u32) -> Result<(), TransportError> {
            self.record("disconnect");
            *self.keys_at_disconnect.lock().unwrap() = Some(self.keyboard.actions());
            Ok(())
        }
    }

    fn advertisement(company_id: u16, data: &[u8]) -> Advertisement<u32> {
        Advertisement {
            device: 7,
            address: "98:B6:E9:00:00:01".to_string(),
            local_name: Some("Pro Controller".to_string()),
            rssi: Some(-55),
            manufacturer_data: HashMap::from([(company_id, data.to_vec())]),
        }
    }

    fn controller_advertisement() -> Advertisement<u32> {
        advertisement(0x0553, &[0x01, 0x00, 0x03, 0x7E, 0x05, 0x69, 0x20])
    }

    fn report(btn1: u8, btn2: u8, btn3: u8) -> Vec<u8> {
        // Both sticks centered
        vec![0x30, 0x00, btn1, btn2, btn3, 0x00, 0x08, 0x80, 0x00, 0x08, 0x80]
    }

    struct Harness {
        handle: BridgeHandle,
        task: JoinHandle<()>,
        events: mpsc::UnboundedReceiver<AppEvent>,
        seen: Vec<AppEvent>,
        keyboard: RecordingKeyboard,
        senders: Senders,
        calls: Arc<Mutex<Vec<&'static str>>>,
        keys_at_disconnect: Arc<Mutex<Option<Vec<KeyAction>>>>,
    }

    impl Harness {
        fn new(transport: MockTransport, max_attempts: u32) -> Self {
            Self::with_scan_timeout(transport, max_attempts, Duration::from_millis(200))
        }

        fn with_scan_timeout(
            mut transport: MockTransport,
            max_attempts: u32,
            scan_timeout: Duration,
        ) -> Self {
            let keyboard = RecordingKeyboard::default();
            transport.keyboard = keyboard.clone();
            let senders = transport.senders.clone();
            let calls = transport.calls.clone();
            let keys_at_disconnect = transport.keys_at_disconnect.clone();

            let config = BridgeConfig {
                input_characteristic: protocol::input_char_uuid(),
                scan_timeout,
                connect_timeout: Duration::from_millis(200),
                queue_capacity: 8,
                dead_zone: 0.5,
                name_hint: None,
                retry: RetryPolicy {
                    max_attempts,
                    base_delay: Duration::from_millis(10),
                    max_delay: Duration::from_millis(20),
                },
                raw_report_logging: true,
            };
            let (event_tx, events) = mpsc::unbounded_channel();
            let service = BridgeService::new(
                transport,
                keyboard.clone(),
                MappingTable::default_bindings().unwrap(),
                config,
                event_tx,
            );
            let (handle, task) = service.spawn();

            Self {
                handle,
                task,
                events,
                seen: Vec::new(),
                keyboard,
                senders,
                calls,
                keys_at_disconnect,
            }
        }

        /// Collect events until `state` is announced
        async fn wait_for_state(&mut self, state: ConnectionState) {
            let target = AppEvent::ConnectionState(state);
            self.wait_for(|event| *event == target).await;
        }

        async fn wait_for(&mut self, done: impl Fn(&AppEvent) -> bool) {
            tokio::time::timeout(WAIT, async {
                while let Some(event) = self.events.recv().await {
                    let found = done(&event);
                    self.seen.push(event);
                    if found {
                        return;
                    }
                }
                panic!("event channel closed");
            })
            .await
            .unwrap_or_else(|_| panic!("timed out, saw {:?}", self.seen));
        }

        fn count(&self, event: &AppEvent) -> usize {
            self.seen.iter().filter(|e| *e == event).count()
        }

        async fn wait_for_keys(&self, count: usize) {
            tokio::time::timeout(WAIT, async {
                while self.keyboard.actions().len() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap_or_else(|_| panic!("saw only {:?}", self.keyboard.actions()));
        }

        fn sender(&self) -> mpsc::Sender<Vec<u8>> {
            self.senders.lock().unwrap().last().cloned().unwrap()
        }

        fn states(&self) -> Vec<ConnectionState> {
            self.seen
                .iter()
                .filter_map(|e| match e {
                    AppEvent::ConnectionState(s) => Some(*s),
                    _ => None,
                })
                .collect()
        }

        async fn shutdown(self) {
            self.handle.shutdown();
            tokio::time::timeout(WAIT, self.task).await.unwrap().unwrap();
        }
    }

    fn sorted_ups(actions: &[KeyAction]) -> Vec<Key> {
        let mut keys: Vec<Key> = actions
            .iter()
            .filter_map(|a| match a {
                KeyAction::Up(k) => Some(*k),
                KeyAction::Down(_) => None,
            })
            .collect();
        keys.sort();
        keys
    }

    fn streaming_transport() -> MockTransport {
        MockTransport {
            advertisements: vec![
                advertisement(0x004C, &[0x02, 0x15, 0x00]),
                controller_advertisement(),
            ],
            ..Default::default()
        }
    }

    async fn hold_a_and_r(harness: &mut Harness) {
        harness.handle.start();
        harness.wait_for_state(ConnectionState::Subscribed).await;
        harness.sender().send(report(0x12, 0, 0)).await.unwrap();
        harness.wait_for_state(ConnectionState::Streaming).await;
        harness.wait_for_keys(2).await;
        assert_eq!(
            harness.keyboard.actions(),
            vec![KeyAction::Down(Key::Z), KeyAction::Down(Key::E)]
        );
    }

    #[tokio::test]
    async fn test_full_session_lifecycle() {
        let mut harness = Harness::new(streaming_transport(), 3);
        harness.handle.start();
        harness.wait_for_state(ConnectionState::Subscribed).await;

        let sender = harness.sender();
        sender.send(report(0x02, 0, 0)).await.unwrap();
        sender.send(report(0x02, 0, 0)).await.unwrap();
        sender.send(report(0x02, 0, 0)).await.unwrap();
        sender.send(report(0x00, 0, 0)).await.unwrap();
        harness.wait_for_keys(2).await;

        assert_eq!(
            harness.states(),
            vec![
                ConnectionState::Scanning,
                ConnectionState::Connecting,
                ConnectionState::Subscribed,
            ]
        );
        assert!(harness
            .seen
            .iter()
            .any(|e| matches!(e, AppEvent::DeviceFound(d) if d.name == "Pro Controller")));
        assert_eq!(
            harness.keyboard.actions(),
            vec![KeyAction::Down(Key::Z), KeyAction::Up(Key::Z)]
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_releases_held_keys_before_disconnect() {
        let mut harness = Harness::new(streaming_transport(), 3);
        hold_a_and_r(&mut harness).await;

        harness.handle.stop();
        harness.wait_for_state(ConnectionState::Disconnected).await;

        let actions = harness.keyboard.actions();
        assert_eq!(actions.len(), 4);
        assert_eq!(sorted_ups(&actions), vec![Key::E, Key::Z]);

        let at_disconnect = harness.keys_at_disconnect.lock().unwrap().clone().unwrap();
        assert_eq!(sorted_ups(&at_disconnect), vec![Key::E, Key::Z]);
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_link_loss_releases_keys_and_reconnects() {
        let mut harness = Harness::new(streaming_transport(), 3);
        hold_a_and_r(&mut harness).await;

        let sender = harness.senders.lock().unwrap().pop().unwrap();
        drop(sender);
        harness.wait_for_state(ConnectionState::Error).await;
        assert_eq!(sorted_ups(&harness.keyboard.actions()), vec![Key::E, Key::Z]);

        harness.wait_for_state(ConnectionState::Subscribed).await;
        assert_eq!(
            harness.calls.lock().unwrap().iter().filter(|c| **c == "connect").count(),
            2
        );

        // Fresh baseline: A pressed again is a new press
        harness.sender().send(report(0x02, 0, 0)).await.unwrap();
        harness.wait_for_keys(5).await;
        assert_eq!(harness.keyboard.actions()[4], KeyAction::Down(Key::Z));
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_foreign_devices_never_reach_connecting() {
        let transport = MockTransport {
            advertisements: vec![
                advertisement(0x004C, &[0x02, 0x15, 0x7E, 0x05]),
                advertisement(0x0006, &[0x69, 0x20]),
                advertisement(0x7E00, &[0x05, 0x69, 0x20]),
            ],
            ..Default::default()
        };
        let mut harness = Harness::new(transport, 1);
        harness.handle.start();

        for _ in 0..3 {
            harness.wait_for(|e| *e == AppEvent::DeviceNotFound).await;
        }
        harness.handle.stop();
        harness.wait_for_state(ConnectionState::Disconnected).await;

        assert!(!harness.states().contains(&ConnectionState::Connecting));
        assert!(!harness.calls.lock().unwrap().contains(&"connect"));
        assert!(!harness
            .seen
            .iter()
            .any(|e| matches!(e, AppEvent::RetriesExhausted { .. })));
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_scans_do_not_spend_retry_budget() {
        let transport = MockTransport {
            empty_scans: 4,
            ..streaming_transport()
        };
        let mut harness = Harness::new(transport, 1);
        harness.handle.start();
        harness.wait_for_state(ConnectionState::Subscribed).await;

        assert_eq!(harness.count(&AppEvent::DeviceNotFound), 4);
        assert_eq!(harness.count(&AppEvent::ConnectionState(ConnectionState::Error)), 4);
        assert!(!harness
            .seen
            .iter()
            .any(|e| matches!(e, AppEvent::RetriesExhausted { .. })));
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_failures_exhaust_retry_budget() {
        let transport = MockTransport {
            connect_failures: 10,
            ..streaming_transport()
        };
        let mut harness = Harness::new(transport, 1);
        harness.handle.start();
        harness
            .wait_for(|e| matches!(e, AppEvent::RetriesExhausted { .. }))
            .await;

        assert_eq!(
            harness.seen.last(),
            Some(&AppEvent::RetriesExhausted { failures: 2 })
        );
        assert_eq!(harness.count(&AppEvent::ConnectionState(ConnectionState::Error)), 2);

        // Parked until a new start
        harness.handle.start();
        harness.wait_for_state(ConnectionState::Scanning).await;
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_failure_is_retried() {
        let transport = MockTransport {
            connect_failures: 1,
            ..streaming_transport()
        };
        let mut harness = Harness::new(transport, 3);
        harness.handle.start();
        harness.wait_for_state(ConnectionState::Subscribed).await;

        assert_eq!(
            harness.states(),
            vec![
                ConnectionState::Scanning,
                ConnectionState::Connecting,
                ConnectionState::Error,
                ConnectionState::Scanning,
                ConnectionState::Connecting,
                ConnectionState::Subscribed,
            ]
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_report_keeps_baseline() {
        let mut harness = Harness::new(streaming_transport(), 3);
        harness.handle.start();
        harness.wait_for_state(ConnectionState::Subscribed).await;

        let sender = harness.sender();
        sender.send(vec![0x30, 0x01, 0x02]).await.unwrap();
        sender.send(report(0x02, 0, 0)).await.unwrap();
        sender.send(vec![0x30]).await.unwrap();
        sender.send(report(0x02, 0, 0)).await.unwrap();
        sender.send(report(0x00, 0, 0)).await.unwrap();
        harness.wait_for_keys(2).await;
        harness.wait_for_state(ConnectionState::Streaming).await;

        assert_eq!(
            harness.keyboard.actions(),
            vec![KeyAction::Down(Key::Z), KeyAction::Up(Key::Z)]
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_interrupts_scan() {
        let transport = MockTransport {
            hang_scan: true,
            ..Default::default()
        };
        let mut harness = Harness::with_scan_timeout(transport, 3, Duration::from_secs(60));
        harness.handle.start();
        harness.wait_for_state(ConnectionState::Scanning).await;

        harness.handle.stop();
        harness.wait_for_state(ConnectionState::Disconnected).await;
        assert_eq!(
            *harness.calls.lock().unwrap(),
            vec!["start_scan", "stop_scan"]
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_stick_keys_follow_zones() {
        let mut harness = Harness::new(streaming_transport(), 3);
        harness.handle.start();
        harness.wait_for_state(ConnectionState::Subscribed).await;

        // Left stick fully left, then fully right
        let mut left = report(0, 0, 0);
        left[5] = 0x00;
        left[6] = 0x00;
        let mut right = report(0, 0, 0);
        right[5] = 0xFF;
        right[6] = 0x0F;

        let sender = harness.sender();
        sender.send(left).await.unwrap();
        sender.send(right).await.unwrap();
        harness.wait_for_keys(3).await;

        assert_eq!(
            harness.keyboard.actions(),
            vec![
                KeyAction::Down(Key::A),
                KeyAction::Up(Key::A),
                KeyAction::Down(Key::D),
            ]
        );
        harness.shutdown().await;
    }
}
