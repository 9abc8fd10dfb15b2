use crate::format::strip_formatting;
use crate::status::{ServerStatus, StatusPublisher, StatusSnapshot};
use gbx_client::GbxClient;
use gbx_proto::Value;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const CURRENT_MAP_METHOD: &str = "GetCurrentChallengeInfo";
pub const NEXT_MAP_METHOD: &str = "GetNextChallengeInfo";
pub const GAME_INFO_METHOD: &str = "GetCurrentGameInfo";

/// Default time between ticks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Anything that can answer an argument-less status call
pub trait StatusSource {
    /// `None` when the call could not be answered, for whatever reason
    fn fetch(&self, method: &str) -> impl Future<Output = Option<Value>> + Send;
}

impl StatusSource for GbxClient {
    fn fetch(&self, method: &str) -> impl Future<Output = Option<Value>> + Send {
        self.call(method, &[])
    }
}

/// Tracks when the current map started, across ticks
#[derive(Debug, Default)]
struct MapSession {
    last_map_uid: String,
    race_started_at: Option<Instant>,
}

impl MapSession {
    /// Records the map seen at `now` and returns how long it has been running
    fn observe(&mut self, uid: &str, now: Instant) -> Duration {
        if uid != self.last_map_uid {
            info!("Map changed to {}", uid);
            self.last_map_uid = uid.to_string();
            self.race_started_at = Some(now);
        }

        self.race_started_at
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default()
    }
}

/// Periodically asks the game server what it is doing and publishes the answer
pub struct Poller<S> {
    source: S,
    publisher: StatusPublisher,
    interval: Duration,
    map: MapSession,
}

impl<S> Poller<S>
where
    S: StatusSource,
{
    pub fn new(source: S, publisher: StatusPublisher, interval: Duration) -> Self {
        Self {
            source,
            publisher,
            interval,
            map: MapSession::default(),
        }
    }

    /// Ticks until `cancel` fires
    ///
    /// Cancellation also interrupts a tick in flight; its connections are
    /// dropped and nothing is published for it.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Polling server status every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Status poller stopped");
    }

    /// Makes the three status calls and publishes the result
    pub async fn tick(&mut self) {
        let (current, next, game) = tokio::join!(
            self.source.fetch(CURRENT_MAP_METHOD),
            self.source.fetch(NEXT_MAP_METHOD),
            self.source.fetch(GAME_INFO_METHOD),
        );

        self.apply(current, next, game, Instant::now());
    }

    fn apply(
        &mut self,
        current: Option<Value>,
        next: Option<Value>,
        game: Option<Value>,
        now: Instant,
    ) {
        let snapshot = match self.derive(current.as_ref(), next.as_ref(), game.as_ref(), now) {
            Some(status) => {
                debug!(
                    "{} -> {}, {}s of {}s left",
                    status.current_map, status.next_map, status.time_remaining, status.time_limit
                );
                StatusSnapshot::live(status)
            }
            None => {
                if !self.publisher.current().is_empty() {
                    warn!("Server status unavailable");
                }
                StatusSnapshot::empty()
            }
        };

        self.publisher.publish(snapshot);
    }

    /// `None` unless current-map and game info both carry what the status needs
    fn derive(
        &mut self,
        current: Option<&Value>,
        next: Option<&Value>,
        game: Option<&Value>,
        now: Instant,
    ) -> Option<ServerStatus> {
        let current = current?;
        let game = game?;

        let uid = current.get("UId")?.as_str()?;
        let elapsed = self.map.observe(uid, now);

        let name = current.get("Name")?.as_str()?;
        let limit_ms = game.get("TimeAttackLimit")?.as_i32()?;

        let time_limit = (f64::from(limit_ms) / 1000.0).max(0.0);
        let time_remaining = (time_limit - elapsed.as_secs_f64()).max(0.0);

        let next_map = next
            .and_then(|info| info.get("Name"))
            .and_then(Value::as_str)
            .map(strip_formatting)
            .unwrap_or_default();

        Some(ServerStatus {
            current_map: strip_formatting(name),
            next_map,
            time_remaining: time_remaining as u64,
            time_limit: time_limit as u64,
        })
    }
}
