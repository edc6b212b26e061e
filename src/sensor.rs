use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info};

use crate::error::FeedError;
use crate::feed::{self, FeedClient};
use crate::parser::{self, AppointmentRecord, RawEntry};
use crate::settings::{Source, MIN_POLL_INTERVAL_SECS};

pub const UNKNOWN: &str = "unknown";
const STATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// Ticks handled a little late must not push the next scheduled tick out of its slot.
const TICK_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorState {
    Unknown,
    Appointment(AppointmentRecord),
}

/// Published view of a sensor.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub entity_id: String,
    pub name: String,
    pub state: String,
    pub attributes: BTreeMap<&'static str, String>,
}

/// Next appointment for one configured source.
pub struct Sensor {
    source: Source,
    interval: Duration,
    last_update: Option<Instant>,
    state: SensorState,
}

impl Sensor {
    pub fn new(source: Source, interval: Duration) -> Self {
        Self {
            source,
            interval: interval.max(Duration::from_secs(MIN_POLL_INTERVAL_SECS)),
            last_update: None,
            state: SensorState::Unknown,
        }
    }

    pub fn entity_id(&self) -> String {
        format!("sensor.blutspende_{}", self.source.id)
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn state(&self) -> &SensorState {
        &self.state
    }

    pub fn query_url(&self, today: NaiveDate) -> String {
        feed::query_url(&self.source, today)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_update {
            None => true,
            Some(last) => now.saturating_duration_since(last) + TICK_SLACK >= self.interval,
        }
    }

    /// Claim the next refresh. Returns false while throttled; the trigger is dropped, not queued.
    pub fn begin_update(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            debug!(entity = %self.entity_id(), "Update throttled");
            return false;
        }
        self.last_update = Some(now);
        true
    }

    /// Replace the state with the outcome of one fetch.
    pub fn apply(&mut self, fetched: Result<Vec<RawEntry>, FeedError>) {
        let entries = match fetched {
            Ok(entries) => entries,
            Err(e) => {
                error!(entity = %self.entity_id(), "Couldn't get data from spenderservice.net: {}", e);
                self.state = SensorState::Unknown;
                return;
            }
        };

        let best = parser::run(
            &entries,
            &self.source.display_format,
            &self.source.zip_filter,
        );
        self.state = match best {
            Some(record) => {
                info!(
                    entity = %self.entity_id(),
                    when = %record.when,
                    zipcode = %record.zipcode(),
                    location = %record.description.location,
                    "Next appointment"
                );
                SensorState::Appointment(record)
            }
            None => {
                info!(
                    entity = %self.entity_id(),
                    entries = entries.len(),
                    "No matching appointment"
                );
                SensorState::Unknown
            }
        };
    }

    pub fn snapshot(&self) -> Snapshot {
        let (state, attributes) = match &self.state {
            SensorState::Appointment(record) => {
                (record.when.format(STATE_FORMAT).to_string(), record.attributes())
            }
            SensorState::Unknown => (UNKNOWN.to_string(), BTreeMap::new()),
        };
        Snapshot {
            entity_id: self.entity_id(),
            name: self.source.name.clone(),
            state,
            attributes,
        }
    }
}

type Fetched = Result<Vec<RawEntry>, FeedError>;

/// Refresh every due sensor: fetches run concurrently, then each result is applied.
/// Returns how many sensors were refreshed.
pub async fn poll_all(
    sensors: &mut [Sensor],
    client: &Arc<FeedClient>,
    now: Instant,
    today: NaiveDate,
) -> usize {
    let mut tasks = JoinSet::new();
    let mut slots = HashMap::new();
    for (idx, sensor) in sensors.iter_mut().enumerate() {
        if !sensor.begin_update(now) {
            continue;
        }
        let url = sensor.query_url(today);
        let client = Arc::clone(client);
        let handle = tasks.spawn(async move { client.fetch(&url).await });
        slots.insert(handle.id(), idx);
    }

    let results = collect_fetches(tasks, &slots, sensors.len()).await;
    let mut refreshed = 0usize;
    for (sensor, fetched) in sensors.iter_mut().zip(results) {
        if let Some(fetched) = fetched {
            sensor.apply(fetched);
            refreshed += 1;
        }
    }
    refreshed
}

/// One slot per sensor. A task that panicked or was cancelled counts as a failed fetch.
async fn collect_fetches(
    mut tasks: JoinSet<Fetched>,
    slots: &HashMap<Id, usize>,
    len: usize,
) -> Vec<Option<Fetched>> {
    let mut results: Vec<Option<Fetched>> = (0..len).map(|_| None).collect();
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, fetched) = match joined {
            Ok((id, fetched)) => (id, fetched),
            Err(e) => (e.id(), Err(FeedError::Task(e.to_string()))),
        };
        if let Some(&idx) = slots.get(&id) {
            results[idx] = Some(fetched);
        }
    }
    results
}
