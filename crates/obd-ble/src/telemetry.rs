//! Telemetry link
//!
//! Wires transport events into the link state machine and the polling
//! scheduler, and routes decoded metrics and status changes to the sink.
//!
//! All link state lives in one [`LinkContext`] behind a single lock.
//! Transition handlers run under that lock and return the transport work
//! to perform; the work itself is awaited after the lock is released and
//! its outcome is fed back as the next event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use obd_conv::{ParseError, ResponseParser};
use obd_core::TelemetrySink;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error as broadcast_error};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::link::{InitSequence, InitStep, LinkAction, LinkEvent, LinkState, LinkStateMachine};
use crate::scheduler::Scheduler;
use crate::transport::{create_transport, uuid_from_u16, BleTransport, TransportError, TransportEvent};

/// Mutable link state, guarded as a unit
struct LinkContext {
    machine: LinkStateMachine,
    scheduler: Scheduler,
    init: InitSequence,
    connected: bool,
    link_error: bool,
    /// When the next scan may start; `None` while scanning is not wanted
    rescan_at: Option<Instant>,
    /// Set by [`TelemetryLink::close`]; suppresses rescans until the next
    /// [`TelemetryLink::run`]
    closing: bool,
}

/// Work decided under the lock and performed after it is released
enum TickWork {
    Scan,
    Write { frame: Vec<u8>, label: String },
}

/// Composition root for one adapter link
pub struct TelemetryLink {
    config: LinkConfig,
    transport: Arc<dyn BleTransport>,
    sink: Arc<dyn TelemetrySink>,
    parser: ResponseParser,
    service: Uuid,
    characteristic: Uuid,
    context: Mutex<LinkContext>,
    events: tokio::sync::Mutex<broadcast::Receiver<TransportEvent>>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
}

impl TelemetryLink {
    pub fn new(
        config: LinkConfig,
        transport: Arc<dyn BleTransport>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        let service = uuid_from_u16(config.adapter.service_uuid);
        let characteristic = uuid_from_u16(config.adapter.characteristic_uuid);
        let context = LinkContext {
            machine: LinkStateMachine::new(service),
            scheduler: Scheduler::new(&config.polling),
            init: InitSequence::new(&config.init),
            connected: false,
            link_error: false,
            rescan_at: Some(Instant::now()),
            closing: false,
        };
        // Subscribe before anything can be emitted
        let events = transport.events();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            parser: ResponseParser::new(config.vehicle.tank_capacity_l),
            config,
            transport,
            sink,
            service,
            characteristic,
            context: Mutex::new(context),
            events: tokio::sync::Mutex::new(events),
            shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Validate the configuration and build the configured transport
    pub async fn from_config(
        config: LinkConfig,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self, LinkError> {
        config.validate()?;
        let transport = create_transport(&config.transport).await?;
        Ok(Self::new(config, transport, sink))
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn BleTransport> {
        &self.transport
    }

    pub fn state(&self) -> LinkState {
        self.context.lock().machine.state()
    }

    /// Last value reported to the connection-status sink
    pub fn is_connected(&self) -> bool {
        self.context.lock().connected
    }

    /// Last value reported to the link-error sink
    pub fn link_error(&self) -> bool {
        self.context.lock().link_error
    }

    /// Ready and the AT initialization sequence has completed
    pub fn is_polling(&self) -> bool {
        let ctx = self.context.lock();
        ctx.machine.state() == LinkState::Ready && ctx.init.is_complete()
    }

    /// Route one transport event
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::AdapterDiscovered(record) => {
                self.dispatch(LinkEvent::AdapterFound(record)).await;
            }
            TransportEvent::Notification(frame) => self.handle_notification(&frame.data),
            TransportEvent::Disconnected { reason } => {
                info!(%reason, "Adapter disconnected");
                self.dispatch(LinkEvent::Disconnected).await;
            }
        }
    }

    /// Handle every transport event already queued, without waiting
    ///
    /// Returns the number of events handled.
    pub async fn process_pending_events(&self) -> usize {
        let mut events = self.events.lock().await;
        let mut handled = 0;
        loop {
            match events.try_recv() {
                Ok(event) => {
                    self.handle_transport_event(event).await;
                    handled += 1;
                }
                Err(broadcast_error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Transport events lagged");
                }
                Err(_) => return handled,
            }
        }
    }

    /// One control-loop step: restart discovery when due, advance the
    /// initialization sequence, or write the next poll command
    pub async fn tick(&self, now: Instant) {
        let work = {
            let mut ctx = self.context.lock();
            match ctx.machine.state() {
                LinkState::Idle => match ctx.rescan_at {
                    Some(at) if !ctx.closing && now >= at => {
                        ctx.rescan_at = None;
                        Some(TickWork::Scan)
                    }
                    _ => None,
                },
                LinkState::Ready => Self::ready_work(&mut ctx, now),
                _ => None,
            }
        };

        match work {
            Some(TickWork::Scan) => self.dispatch(LinkEvent::StartScan).await,
            Some(TickWork::Write { frame, label }) => {
                debug!(command = %label, frame = %hex::encode(&frame), "Write");
                if let Err(e) = self.transport.write_without_response(&frame).await {
                    error!(command = %label, error = %e, "Write failed");
                    self.dispatch(LinkEvent::FatalError(e.to_string())).await;
                }
            }
            None => {}
        }
    }

    fn ready_work(ctx: &mut LinkContext, now: Instant) -> Option<TickWork> {
        if !ctx.init.is_complete() {
            match ctx.init.poll(now) {
                InitStep::Send(command) => {
                    return Some(TickWork::Write {
                        frame: command.frame().to_vec(),
                        label: command.name().to_string(),
                    });
                }
                InitStep::Finished => info!("Adapter initialized, polling started"),
                InitStep::Wait | InitStep::Inactive => return None,
            }
        }

        let command = ctx.scheduler.next_command(now, true)?;
        Some(TickWork::Write {
            frame: command.frame().to_vec(),
            label: command.to_string(),
        })
    }

    fn handle_notification(&self, data: &[u8]) {
        let mut ctx = self.context.lock();
        if ctx.machine.state() != LinkState::Ready {
            debug!(frame = %hex::encode(data), state = %ctx.machine.state(), "Notification outside ready state");
            return;
        }
        if ctx.init.is_running() {
            debug!(frame = %hex::encode(data), "Init response");
            ctx.init.on_response(data);
            return;
        }

        let expected = ctx.scheduler.in_flight().copied();
        match self.parser.parse(data, expected.as_ref()) {
            Ok(metric) => {
                debug!(%metric, "Decoded");
                ctx.scheduler.complete();
                self.set_link_error(&mut ctx, false);
                self.sink.on_metric(metric);
            }
            Err(ParseError::AdapterError) => {
                warn!(frame = %hex::encode(data), "Adapter reported an error");
                ctx.scheduler.complete();
                self.set_link_error(&mut ctx, true);
            }
            Err(e) => {
                debug!(frame = %hex::encode(data), error = %e, kind = ?e.kind(), "Frame discarded");
            }
        }
    }

    /// Feed an event through the state machine, performing requested work
    /// until no more events result
    pub async fn dispatch(&self, event: LinkEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let actions = {
                let mut ctx = self.context.lock();
                self.apply(&mut ctx, event, Instant::now())
            };
            for action in actions {
                if let Some(feedback) = self.perform(action).await {
                    pending.push_back(feedback);
                }
            }
        }
    }

    fn apply(&self, ctx: &mut LinkContext, event: LinkEvent, now: Instant) -> Vec<LinkAction> {
        let scan_failed =
            ctx.machine.state() == LinkState::Scanning && matches!(event, LinkEvent::FatalError(_));

        let transition = ctx.machine.handle(event);
        if !transition.changed() {
            return transition.actions;
        }
        info!(from = %transition.from, to = %transition.to, "Link state changed");

        if transition.left(LinkState::Ready) {
            // Release the awaited response now so the next session starts clean
            ctx.scheduler.reset();
            ctx.init.reset();
            self.set_connected(ctx, false);
        }
        if transition.entered(LinkState::Ready) {
            ctx.init.start(now);
            self.set_connected(ctx, true);
        }
        if transition.entered(LinkState::Idle) {
            ctx.scheduler.reset();
            ctx.init.reset();
            ctx.rescan_at = if ctx.closing {
                None
            } else if scan_failed {
                Some(now + self.config.scan_retry())
            } else {
                Some(now)
            };
        }

        transition.actions
    }

    async fn perform(&self, action: LinkAction) -> Option<LinkEvent> {
        match action {
            LinkAction::StartScan => match self.transport.start_scan(self.service).await {
                Ok(()) => {
                    info!(service = %self.service, "Scanning for adapter");
                    None
                }
                Err(e) => {
                    error!(error = %e, "Scan could not be started");
                    Some(LinkEvent::FatalError(e.to_string()))
                }
            },
            LinkAction::StopScan => {
                if let Err(e) = self.transport.stop_scan().await {
                    warn!(error = %e, "Stop scan failed");
                }
                None
            }
            LinkAction::Connect(record) => {
                info!(address = %record.address, name = ?record.name, rssi = ?record.rssi, "Connecting to adapter");
                match self.transport.connect(&record).await {
                    Ok(()) => Some(LinkEvent::ConnectSucceeded),
                    Err(e) => {
                        warn!(address = %record.address, error = %e, "Connection failed");
                        Some(LinkEvent::ConnectFailed(e.to_string()))
                    }
                }
            }
            LinkAction::Subscribe => Some(self.subscribe().await),
            LinkAction::Disconnect => {
                if let Err(e) = self.transport.disconnect().await {
                    warn!(error = %e, "Disconnect failed");
                }
                Some(LinkEvent::Disconnected)
            }
        }
    }

    async fn subscribe(&self) -> LinkEvent {
        let info = match self
            .transport
            .discover_characteristic(self.service, self.characteristic)
            .await
        {
            Ok(info) => info,
            Err(TransportError::CharacteristicMissing(uuid)) => {
                warn!(characteristic = %format!("0x{:04X}", uuid), "Command characteristic not found");
                return LinkEvent::CharacteristicMissing;
            }
            Err(e) => return LinkEvent::FatalError(e.to_string()),
        };

        if !info.can_notify {
            warn!(characteristic = %info.uuid, "Characteristic does not support notify");
            return LinkEvent::CharacteristicFound {
                notify_enabled: false,
            };
        }
        if !info.can_write {
            warn!(characteristic = %info.uuid, "Characteristic is not writable");
        }

        match self.transport.subscribe().await {
            Ok(()) => LinkEvent::CharacteristicFound {
                notify_enabled: true,
            },
            Err(e) => {
                warn!(error = %e, "Enabling notifications failed");
                LinkEvent::CharacteristicFound {
                    notify_enabled: false,
                }
            }
        }
    }

    fn set_connected(&self, ctx: &mut LinkContext, connected: bool) {
        if ctx.connected != connected {
            ctx.connected = connected;
            self.sink.on_connection_status(connected);
        }
    }

    fn set_link_error(&self, ctx: &mut LinkContext, present: bool) {
        if ctx.link_error != present {
            ctx.link_error = present;
            self.sink.on_link_error(present);
        }
    }

    /// Close the link and stop rediscovery
    pub async fn close(&self) {
        {
            let mut ctx = self.context.lock();
            ctx.closing = true;
            ctx.rescan_at = None;
        }
        self.dispatch(LinkEvent::CloseRequested).await;
    }

    /// Ask a running [`run`](Self::run) loop to close the link and return
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Drive the link until [`shutdown`](Self::shutdown) is called
    ///
    /// May be called again after it returns; a closed link starts
    /// discovery afresh. A shutdown requested before `run` starts is
    /// discarded.
    pub async fn run(&self) -> Result<(), LinkError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(LinkError::AlreadyRunning);
        }

        self.shutdown_tx.send_replace(false);
        {
            let mut ctx = self.context.lock();
            if ctx.closing {
                ctx.closing = false;
                if ctx.machine.state() == LinkState::Idle {
                    ctx.rescan_at = Some(Instant::now());
                }
            }
        }

        let mut events = self.events.lock().await;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.polling.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            service = %format!("0x{:04X}", self.config.adapter.service_uuid),
            tick_ms = self.config.polling.tick_ms,
            "Telemetry link started"
        );

        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = ticker.tick() => self.tick(Instant::now()).await,
                event = events.recv() => match event {
                    Ok(event) => self.handle_transport_event(event).await,
                    Err(broadcast_error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Transport events lagged");
                    }
                    Err(broadcast_error::RecvError::Closed) => {
                        error!("Transport event stream closed");
                        break;
                    }
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        drop(events);

        self.close().await;
        self.running.store(false, Ordering::SeqCst);
        info!("Telemetry link stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockConfig;
    use crate::transport::mock::MockTransport;
    use obd_core::testing::RecordingSink;
    use obd_core::{Metric, MetricKind};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn setup() -> (TelemetryLink, Arc<MockTransport>, Arc<RecordingSink>) {
        let mock = Arc::new(MockTransport::new(&MockConfig::default()));
        let sink = Arc::new(RecordingSink::new());
        let link = TelemetryLink::new(LinkConfig::default(), mock.clone(), sink.clone());
        (link, mock, sink)
    }

    async fn step(link: &TelemetryLink, now: Instant) {
        link.tick(now).await;
        link.process_pending_events().await;
    }

    async fn connect(link: &TelemetryLink) {
        step(link, Instant::now()).await;
        assert_eq!(link.state(), LinkState::Ready);
    }

    /// Connect and run the init sequence; returns the time base used
    async fn connect_and_init(link: &TelemetryLink) -> Instant {
        connect(link).await;
        let t0 = Instant::now();
        for i in 0..4 {
            step(link, t0 + ms(500 + i)).await;
        }
        assert!(link.is_polling());
        t0
    }

    #[tokio::test]
    async fn test_first_tick_connects() {
        let (link, mock, sink) = setup();
        assert_eq!(link.state(), LinkState::Idle);

        connect(&link).await;
        assert!(mock.is_connected());
        assert!(!mock.is_scanning());
        assert!(link.is_connected());
        assert_eq!(sink.connection_changes(), vec![true]);
        // Nothing written before the settle delay
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn test_init_sequence_precedes_polling() {
        let (link, mock, _sink) = setup();
        connect_and_init(&link).await;

        let writes = mock.writes();
        let expected: Vec<&[u8]> = vec![b"ATZ\r", b"ATE0\r", b"ATSP6\r", b"010D\r"];
        assert_eq!(writes, expected);
    }

    #[tokio::test]
    async fn test_metrics_reach_sink() {
        let (link, _mock, sink) = setup();
        let t0 = connect_and_init(&link).await;
        for i in 4..8 {
            step(&link, t0 + ms(500 + i)).await;
        }

        assert_eq!(
            sink.metrics(),
            vec![
                Metric::new(MetricKind::Speed, 60),
                Metric::new(MetricKind::EngineRpm, 3000),
                Metric::new(MetricKind::CoolantTemp, 90),
                Metric::new(MetricKind::FuelLevel, 25),
            ]
        );
    }

    #[tokio::test]
    async fn test_adapter_error_toggles_link_error() {
        let (link, mock, sink) = setup();
        mock.set_response("010D", b"CAN ERROR\r\r>");
        let t0 = connect_and_init(&link).await;
        assert!(link.link_error());

        // The error completed the command, so polling moves on
        step(&link, t0 + ms(504)).await;
        assert_eq!(sink.last_value(MetricKind::EngineRpm), Some(3000));
        assert!(!link.link_error());
        assert_eq!(sink.link_error_changes(), vec![true, false]);
        assert_eq!(sink.last_value(MetricKind::Speed), None);
    }

    #[tokio::test]
    async fn test_truncated_frame_changes_nothing() {
        let (link, mock, sink) = setup();
        mock.silence("010D");
        connect_and_init(&link).await;
        sink.clear();

        mock.inject_notification(b"41 0D");
        link.process_pending_events().await;

        assert!(sink.calls().is_empty());
        assert!(!link.link_error());
    }

    #[tokio::test]
    async fn test_mismatched_pid_is_discarded() {
        let (link, mock, sink) = setup();
        mock.set_response("010D", b"41 0C 2E E0 \r\r>");
        let t0 = connect_and_init(&link).await;
        assert!(sink.metrics().is_empty());

        // Still waiting on speed
        step(&link, t0 + ms(600)).await;
        assert_eq!(mock.writes().len(), 4);
    }

    #[tokio::test]
    async fn test_disconnect_releases_and_rescans() {
        let (link, mock, sink) = setup();
        mock.silence("010D");
        connect_and_init(&link).await;

        mock.drop_link("link loss");
        link.process_pending_events().await;
        assert_eq!(link.state(), LinkState::Idle);
        assert!(!link.is_connected());

        // Repeated disconnects have no further effect
        link.handle_transport_event(TransportEvent::Disconnected {
            reason: "again".to_string(),
        })
        .await;
        assert_eq!(sink.connection_changes(), vec![true, false]);

        mock.unsilence("010D");
        mock.clear_writes();
        connect(&link).await;
        let t0 = Instant::now();
        for i in 0..5 {
            step(&link, t0 + ms(500 + i)).await;
        }
        // The first poll of the new session is not swallowed
        assert_eq!(sink.last_value(MetricKind::Speed), Some(60));
        assert_eq!(sink.connection_changes(), vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_remote_drop_releases_transport() {
        let (link, mock, _sink) = setup();
        connect_and_init(&link).await;
        assert_eq!(mock.disconnect_calls(), 0);

        mock.drop_link("link loss");
        link.process_pending_events().await;
        assert_eq!(link.state(), LinkState::Idle);
        assert_eq!(mock.disconnect_calls(), 1);

        // The new session is not affected by the cleanup
        connect_and_init(&link).await;
        assert!(mock.is_connected());
        assert_eq!(mock.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_poll_write_failure_returns_to_idle() {
        let (link, mock, sink) = setup();
        let t0 = connect_and_init(&link).await;

        mock.fail_next_writes(1);
        step(&link, t0 + ms(504)).await;
        assert_eq!(link.state(), LinkState::Idle);
        assert!(!mock.is_connected());
        assert_eq!(sink.connection_changes(), vec![true, false]);

        // Discovery restarts on the next tick
        connect(&link).await;
        assert_eq!(sink.connection_changes(), vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_init_write_failure_returns_to_idle() {
        let (link, mock, _sink) = setup();
        connect(&link).await;

        mock.fail_next_writes(1);
        step(&link, Instant::now() + ms(500)).await;
        assert_eq!(link.state(), LinkState::Idle);
        assert!(mock.writes().is_empty());

        connect_and_init(&link).await;
        assert_eq!(mock.writes()[0], b"ATZ\r".to_vec());
    }

    #[tokio::test]
    async fn test_missing_characteristic_returns_to_idle() {
        let (link, mock, sink) = setup();
        mock.set_characteristic_present(false);

        step(&link, Instant::now()).await;
        assert_eq!(link.state(), LinkState::Idle);
        assert!(!mock.is_connected());
        assert!(sink.connection_changes().is_empty());

        mock.set_characteristic_present(true);
        connect(&link).await;
    }

    #[tokio::test]
    async fn test_scan_failure_waits_before_retry() {
        let (link, mock, _sink) = setup();
        mock.fail_next_scans(1);

        let t0 = Instant::now();
        step(&link, t0).await;
        assert_eq!(link.state(), LinkState::Idle);

        step(&link, t0 + ms(10)).await;
        assert_eq!(link.state(), LinkState::Idle);

        step(&link, t0 + ms(2000)).await;
        assert_eq!(link.state(), LinkState::Ready);
    }

    #[tokio::test]
    async fn test_close_suppresses_rescan() {
        let (link, mock, sink) = setup();
        connect(&link).await;

        link.close().await;
        assert_eq!(link.state(), LinkState::Idle);
        assert!(!mock.is_connected());
        assert_eq!(sink.connection_changes(), vec![true, false]);

        step(&link, Instant::now() + ms(5000)).await;
        assert_eq!(link.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let mut config = LinkConfig::default();
        config.init.settle_delay_ms = 0;
        let mock = Arc::new(MockTransport::new(&MockConfig::default()));
        let sink = Arc::new(RecordingSink::new());
        let link = Arc::new(TelemetryLink::new(config, mock.clone(), sink.clone()));

        let runner = {
            let link = link.clone();
            tokio::spawn(async move { link.run().await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.last_value(MetricKind::FuelLevel).is_none() {
                tokio::time::sleep(ms(10)).await;
            }
        })
        .await
        .expect("metrics within 5s");

        assert!(matches!(link.run().await, Err(LinkError::AlreadyRunning)));

        link.shutdown();
        runner.await.unwrap().unwrap();
        assert_eq!(link.state(), LinkState::Idle);
        assert!(!mock.is_connected());

        // A second run reconnects and polls again
        sink.clear();
        let runner = {
            let link = link.clone();
            tokio::spawn(async move { link.run().await })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.last_value(MetricKind::Speed).is_none() {
                tokio::time::sleep(ms(10)).await;
            }
        })
        .await
        .expect("metrics after restart within 5s");
        assert_eq!(sink.connection_changes(), vec![true]);

        link.shutdown();
        runner.await.unwrap().unwrap();
        assert_eq!(link.state(), LinkState::Idle);
    }
}
