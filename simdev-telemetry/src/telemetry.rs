use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, instrument, trace, warn};

use crate::remote::{Message, Transport};
use crate::state::TwinStore;
use crate::util::interrupt::Interrupt;
use crate::util::types::DeviceId;

use super::reading::{Reading, TelemetryMessage};

#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Identifier stamped on every message
    pub device_id: DeviceId,

    /// Seed for the sensor simulation, random if not set
    pub seed: Option<u64>,
}

/// Counters kept by a telemetry loop over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySummary {
    /// Samples generated, this is also the last message id
    pub generated: u64,
    pub sent: u64,
    pub failed: u64,
}

/// A telemetry loop that has not been started yet
pub struct TelemetryLoop<T> {
    config: TelemetryConfig,
    store: TwinStore,
    transport: Arc<T>,
}

impl<T: Transport> TelemetryLoop<T> {
    pub fn new(config: TelemetryConfig, store: TwinStore, transport: Arc<T>) -> Self {
        Self {
            config,
            store,
            transport,
        }
    }

    /// Spawn the loop on the runtime.
    ///
    /// The loop runs until cancelled through the returned handle.
    pub fn start(self) -> RunningTelemetry {
        let interrupt = Interrupt::new();
        let handle = tokio::spawn(run(self, interrupt.clone()));
        RunningTelemetry { interrupt, handle }
    }
}

/// Handle to a running telemetry loop
#[derive(Debug)]
pub struct RunningTelemetry {
    interrupt: Interrupt,
    handle: JoinHandle<TelemetrySummary>,
}

impl RunningTelemetry {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the loop and wait for it to terminate.
    ///
    /// A send already in progress is allowed to complete, no message is
    /// sent after that. The loop cannot be restarted.
    pub async fn cancel(self) -> Result<TelemetrySummary, JoinError> {
        self.interrupt.trigger();
        self.handle.await
    }
}

#[instrument(name = "telemetry", skip_all, fields(device_id = %telemetry.config.device_id))]
async fn run<T: Transport>(telemetry: TelemetryLoop<T>, interrupt: Interrupt) -> TelemetrySummary {
    let TelemetryLoop {
        config,
        store,
        transport,
    } = telemetry;

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut summary = TelemetrySummary::default();

    info!("started");
    loop {
        if interrupt.is_triggered() {
            break;
        }

        let interval = store.interval();

        let reading = Reading::generate(|| rng.random::<f64>());
        summary.generated += 1;
        let telemetry = TelemetryMessage::new(
            config.device_id.clone(),
            summary.generated,
            Utc::now(),
            reading,
        );

        match Message::json(&telemetry) {
            Ok(message) => match transport.send_event(message).await {
                Ok(()) => {
                    summary.sent += 1;
                    debug!("sent message: {telemetry:?}");
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(message_id = summary.generated, "send failed: {e}");
                }
            },
            Err(e) => {
                summary.failed += 1;
                warn!(message_id = summary.generated, "failed to encode message: {e}");
            }
        }

        trace!("next message in {interval}");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from(interval)) => {}
            _ = interrupt.wait() => break,
        }
    }

    info!(
        generated = summary.generated,
        sent = summary.sent,
        failed = summary.failed,
        "cancelled"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{EventSender, TransportError, Twin};
    use crate::state::models::Interval;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::sync::Mutex;
    use tokio::time::{Instant, sleep};

    /// Transport recording every telemetry message with its send time.
    /// Every `fail_every`-th send fails.
    #[derive(Default)]
    struct Sink {
        sent: Mutex<Vec<(Instant, Value)>>,
        attempts: Mutex<u64>,
        fail_every: Option<u64>,
        send_delay: Option<Duration>,
    }

    impl Sink {
        fn failing_every(n: u64) -> Self {
            Self {
                fail_every: Some(n),
                ..Default::default()
            }
        }

        fn delaying(delay: Duration) -> Self {
            Self {
                send_delay: Some(delay),
                ..Default::default()
            }
        }

        fn messages(&self) -> Vec<Value> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, msg)| msg.clone())
                .collect()
        }

        fn times(&self) -> Vec<Instant> {
            self.sent.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }

        fn attempts(&self) -> u64 {
            *self.attempts.lock().unwrap()
        }
    }

    impl Transport for Sink {
        async fn open(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn get_twin(&self) -> Result<Twin, TransportError> {
            Ok(Twin::default())
        }

        async fn update_reported(&self, _: Value) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send_event(&self, message: Message) -> Result<(), TransportError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                *attempts += 1;
                *attempts
            };
            if let Some(delay) = self.send_delay {
                sleep(delay).await;
            }
            if self.fail_every.is_some_and(|n| attempt % n == 0) {
                return Err(TransportError::Send("link down".to_owned()));
            }
            let value: Value = serde_json::from_slice(&message.body)?;
            self.sent.lock().unwrap().push((Instant::now(), value));
            Ok(())
        }

        async fn set_event_sender(&self, _: EventSender) -> Result<(), TransportError> {
            Ok(())
        }

        async fn register_methods(&self, _: Vec<String>) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            device_id: DeviceId::from("sim0"),
            seed: Some(42),
        }
    }

    fn interval(ms: u64) -> Interval {
        Interval::from_millis(ms).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn it_numbers_messages_sequentially_despite_send_failures() {
        let store = TwinStore::new(interval(3000));
        let sink = Arc::new(Sink::failing_every(2));

        let running = TelemetryLoop::new(config(), store, sink.clone()).start();
        sleep(Duration::from_millis(15_001)).await;
        let summary = running.cancel().await.unwrap();

        // sends at 0, 3s, 6s, 9s, 12s and 15s
        assert_eq!(
            summary,
            TelemetrySummary {
                generated: 6,
                sent: 3,
                failed: 3
            }
        );
        assert_eq!(sink.attempts(), 6);

        // every other send failed, the ids keep counting
        let ids: Vec<u64> = sink
            .messages()
            .iter()
            .map(|m| m["messageid"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn it_sends_messages_in_the_external_schema() {
        let store = TwinStore::new(interval(1000));
        let sink = Arc::new(Sink::default());

        let running = TelemetryLoop::new(config(), store, sink.clone()).start();
        sleep(Duration::from_millis(4_500)).await;
        running.cancel().await.unwrap();

        let messages = sink.messages();
        assert_eq!(messages.len(), 5);
        for (i, msg) in messages.iter().enumerate() {
            assert_eq!(msg["messageid"], (i + 1) as u64);
            assert_eq!(msg["simulatordeviceid"], "sim0");
            assert!(msg["timecreated"].is_string());

            let temp = msg["temp"].as_f64().unwrap();
            assert!((20.0..35.0).contains(&temp));
            assert!((60.0..80.0).contains(&msg["humidity"].as_f64().unwrap()));
            assert!((500.0..600.0).contains(&msg["pressure"].as_f64().unwrap()));
            assert_eq!(msg["fanmode"] == "1", temp > 25.0);
            match msg.get("overheat") {
                Some(flag) => {
                    assert!(temp > 30.0);
                    assert_eq!(flag, "ERRORVERHEAT");
                }
                None => assert!(temp <= 30.0),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn it_uses_a_new_interval_on_the_next_cycle() {
        let store = TwinStore::new(interval(1000));
        let sink = Arc::new(Sink::default());

        let running = TelemetryLoop::new(config(), store.clone(), sink.clone()).start();
        sleep(Duration::from_millis(500)).await;
        store.set_interval(interval(5000));
        sleep(Duration::from_millis(6_000)).await;
        running.cancel().await.unwrap();

        // the first sleep was already under way with the old interval
        let times = sink.times();
        assert_eq!(times.len(), 3);
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_millis(1000) && gaps[0] < Duration::from_millis(1010));
        assert!(gaps[1] >= Duration::from_millis(5000) && gaps[1] < Duration::from_millis(5010));
    }

    #[tokio::test(start_paused = true)]
    async fn it_stops_promptly_when_cancelled_while_sleeping() {
        let store = TwinStore::new(interval(60_000));
        let sink = Arc::new(Sink::default());

        let running = TelemetryLoop::new(config(), store, sink.clone()).start();
        sleep(Duration::from_millis(10)).await;

        let start = Instant::now();
        let summary = running.cancel().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(summary.generated, 1);

        // nothing is sent after the loop is cancelled
        sleep(Duration::from_secs(120)).await;
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn it_lets_an_in_flight_send_complete_when_cancelled() {
        let store = TwinStore::new(interval(100));
        let sink = Arc::new(Sink::delaying(Duration::from_secs(1)));

        let running = TelemetryLoop::new(config(), store, sink.clone()).start();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(sink.attempts(), 1);
        assert!(sink.messages().is_empty());

        let start = Instant::now();
        let summary = running.cancel().await.unwrap();

        // cancel waits for the remaining half of the send
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(
            summary,
            TelemetrySummary {
                generated: 1,
                sent: 1,
                failed: 0
            }
        );
        assert_eq!(sink.messages().len(), 1);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn it_reproduces_readings_from_a_seed() {
        let first = Arc::new(Sink::default());
        let second = Arc::new(Sink::default());

        for sink in [&first, &second] {
            let running =
                TelemetryLoop::new(config(), TwinStore::new(interval(100)), sink.clone()).start();
            sleep(Duration::from_millis(250)).await;
            running.cancel().await.unwrap();
        }

        let temps = |sink: &Sink| -> Vec<Value> {
            sink.messages().iter().map(|m| m["temp"].clone()).collect()
        };
        assert_eq!(temps(first.as_ref()).len(), 3);
        assert_eq!(temps(first.as_ref()), temps(second.as_ref()));
    }
}
