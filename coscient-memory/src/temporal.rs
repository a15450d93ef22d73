//! Temporal read guarantees
//!
//! The temporal index is append-only in timestamp order, which gives
//! readers a total order over state updates, monotonic "latest" reads,
//! snapshot-as-of queries, and per-agent read-your-writes.

use crate::memory::{read_json, write_json, ContextMemory};
use crate::records::{
    RetrievedState, SessionHistoryEntry, StoredStateUpdate, VersionInfo, WriteReservation,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

impl ContextMemory {
    /// All state updates within `[start, end]`, ordered by timestamp.
    pub async fn retrieve_states_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<StoredStateUpdate> {
        let indices = self.indices.lock().await;
        let mut states = Vec::new();
        for (_, paths) in indices.temporal.range(start..=end) {
            for path in paths {
                match read_json::<StoredStateUpdate>(path) {
                    Ok(state) => states.push(state),
                    Err(e) => warn!("failed to read state file {}: {e}", path.display()),
                }
            }
        }
        states
    }

    /// Retrieve state with read-your-writes consistency for an agent.
    ///
    /// Returns the newest state written by `agent_id` when one exists,
    /// otherwise the global latest.
    pub async fn retrieve_state_for_agent(&self, agent_id: &str) -> Option<RetrievedState> {
        let own_state = {
            let indices = self.indices.lock().await;
            let mut found = None;
            'outer: for (_, paths) in indices.temporal.iter().rev() {
                for path in paths.iter().rev() {
                    if let Ok(state) = read_json::<StoredStateUpdate>(path) {
                        if state.writer_id == agent_id {
                            found = Some(state);
                            break 'outer;
                        }
                    }
                }
            }
            found
        };

        match own_state {
            Some(state) => {
                let mut projected = Self::project_state(&state, "latest");
                // Surface the statistics value alongside the writer for
                // read-your-writes assertions.
                if let Some(value) = state.system_statistics.get("value") {
                    if let Some(Value::Object(system_state)) = projected.content.get_mut("system_state")
                    {
                        system_state.insert("value".to_string(), value.clone());
                    }
                }
                projected
                    .content
                    .insert("writer_id".to_string(), Value::from(agent_id));
                Some(projected)
            }
            None => self.retrieve_state().await,
        }
    }

    /// Snapshot isolation: the newest state with timestamp ≤ `timestamp`.
    pub async fn retrieve_state_as_of(&self, timestamp: DateTime<Utc>) -> Option<RetrievedState> {
        let best = {
            let indices = self.indices.lock().await;
            indices
                .temporal
                .range(..=timestamp)
                .next_back()
                .and_then(|(_, paths)| paths.last().cloned())
        };

        let state: StoredStateUpdate = read_json(&best?).ok()?;
        let mut projected = Self::project_state(&state, "as_of");
        projected.timestamp_range = Some((state.timestamp, timestamp));
        Some(projected)
    }

    /// Recent version history in chronological order with sequential
    /// version numbers.
    pub async fn get_version_history(&self, limit: usize) -> Vec<VersionInfo> {
        let indices = self.indices.lock().await;
        let mut versions = Vec::new();

        'outer: for (_, paths) in indices.temporal.iter().rev() {
            for path in paths.iter().rev() {
                if let Ok(state) = read_json::<StoredStateUpdate>(path) {
                    versions.push(VersionInfo {
                        version: 0,
                        timestamp: state.timestamp,
                        writer_id: state.writer_id,
                        update_type: state.update_type,
                    });
                    if versions.len() >= limit {
                        break 'outer;
                    }
                }
            }
        }

        versions.reverse();
        for (i, version) in versions.iter_mut().enumerate() {
            version.version = (i + 1) as u32;
        }
        versions
    }

    /// Causal history of a session: state-update projections in timestamp
    /// order where `orchestration_state.session_id` matches.
    pub async fn get_session_history(&self, session_id: &str) -> Vec<SessionHistoryEntry> {
        let indices = self.indices.lock().await;
        let mut history = Vec::new();

        for (_, paths) in indices.temporal.iter() {
            for path in paths {
                let Ok(state) = read_json::<StoredStateUpdate>(path) else {
                    continue;
                };
                if state.orchestration_state.get("session_id").and_then(Value::as_str)
                    != Some(session_id)
                {
                    continue;
                }
                history.push(SessionHistoryEntry {
                    timestamp: state.timestamp,
                    step: state.system_statistics.get("step").cloned(),
                    value: state.system_statistics.get("value").cloned(),
                    update_type: state.update_type,
                });
            }
        }

        history
    }

    /// Every stored timestamp, in order.
    pub async fn get_all_timestamps(&self) -> Vec<DateTime<Utc>> {
        let indices = self.indices.lock().await;
        indices
            .temporal
            .iter()
            .flat_map(|(ts, paths)| std::iter::repeat(*ts).take(paths.len()))
            .collect()
    }

    /// Reserve a write window for an agent.
    ///
    /// The reservation is persisted to `configuration/write_reservations.json`
    /// with expired entries evicted. Purely informational: it never delays
    /// other writers.
    pub async fn reserve_write_window(
        &self,
        agent_id: &str,
        duration: std::time::Duration,
    ) -> Option<WriteReservation> {
        let path = self.configuration_dir().join("write_reservations.json");

        let mut reservations: HashMap<String, WriteReservation> = if path.exists() {
            read_json(&path).unwrap_or_default()
        } else {
            HashMap::new()
        };

        let now = Utc::now();
        reservations.retain(|_, r| r.expiry > now);

        if let Some(existing) = reservations.get(agent_id) {
            return Some(existing.clone());
        }

        let duration_seconds = duration.as_secs_f64();
        let reservation = WriteReservation {
            agent_id: agent_id.to_string(),
            start_time: now,
            expiry: now + Duration::milliseconds((duration_seconds * 1000.0) as i64),
            duration_seconds,
        };
        reservations.insert(agent_id.to_string(), reservation.clone());

        match write_json(&path, &reservations) {
            Ok(()) => Some(reservation),
            Err(e) => {
                warn!("failed to reserve write window: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::StateUpdate;
    use coscient_core::{MemoryConfig, UpdateType};
    use serde_json::json;

    async fn temp_memory() -> (tempfile::TempDir, ContextMemory) {
        let dir = tempfile::tempdir().unwrap();
        let memory = ContextMemory::new(dir.path().join("context"), MemoryConfig::default()).unwrap();
        memory.initialize().await.unwrap();
        memory.start_new_iteration().await.unwrap();
        (dir, memory)
    }

    async fn store_at(
        memory: &ContextMemory,
        ts: DateTime<Utc>,
        writer: &str,
        stats: &[(&str, Value)],
        session: Option<&str>,
    ) {
        let mut update = StateUpdate::new(UpdateType::Periodic).with_writer(writer);
        update.timestamp = ts;
        for (k, v) in stats {
            update.system_statistics.insert(k.to_string(), v.clone());
        }
        if let Some(session) = session {
            update
                .orchestration_state
                .insert("session_id".to_string(), json!(session));
        }
        assert!(memory.store_state_update(update).await.success);
    }

    #[tokio::test]
    async fn range_query_is_ordered() {
        let (_dir, memory) = temp_memory().await;
        let base = Utc::now();

        for i in 0..5 {
            store_at(
                &memory,
                base + Duration::seconds(i),
                "w",
                &[("step", json!(i))],
                None,
            )
            .await;
        }

        let states = memory
            .retrieve_states_in_range(base + Duration::seconds(1), base + Duration::seconds(3))
            .await;
        let steps: Vec<i64> = states
            .iter()
            .map(|s| s.system_statistics["step"].as_i64().unwrap())
            .collect();
        assert_eq!(steps, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn read_your_writes_prefers_own_state() {
        let (_dir, memory) = temp_memory().await;
        let base = Utc::now();

        store_at(&memory, base, "agent-a", &[("value", json!("a-old"))], None).await;
        store_at(
            &memory,
            base + Duration::seconds(1),
            "agent-b",
            &[("value", json!("b-new"))],
            None,
        )
        .await;

        // agent-a sees its own latest write, not agent-b's newer one.
        let state = memory.retrieve_state_for_agent("agent-a").await.unwrap();
        assert_eq!(state.content["writer_id"], json!("agent-a"));
        assert_eq!(state.content["statistics"]["value"], json!("a-old"));

        // An agent with no writes sees the global latest.
        let state = memory.retrieve_state_for_agent("agent-c").await.unwrap();
        assert_eq!(state.content["statistics"]["value"], json!("b-new"));
    }

    #[tokio::test]
    async fn snapshot_as_of_returns_newest_at_or_before() {
        let (_dir, memory) = temp_memory().await;
        let base = Utc::now();

        store_at(&memory, base, "w", &[("step", json!(0))], None).await;
        store_at(&memory, base + Duration::seconds(10), "w", &[("step", json!(1))], None).await;

        let snapshot = memory
            .retrieve_state_as_of(base + Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(snapshot.content["statistics"]["step"], json!(0));

        // Before everything: nothing.
        assert!(memory
            .retrieve_state_as_of(base - Duration::seconds(5))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn monotonic_latest_reads() {
        let (_dir, memory) = temp_memory().await;
        let base = Utc::now();

        store_at(&memory, base, "w", &[("step", json!(0))], None).await;
        let first = memory.retrieve_state().await.unwrap();

        store_at(&memory, base + Duration::seconds(1), "w", &[("step", json!(1))], None).await;
        let second = memory.retrieve_state().await.unwrap();

        let step_of = |s: &RetrievedState| s.content["statistics"]["step"].as_i64().unwrap();
        assert!(step_of(&second) >= step_of(&first));
    }

    #[tokio::test]
    async fn version_history_is_sequential() {
        let (_dir, memory) = temp_memory().await;
        let base = Utc::now();

        for i in 0..4 {
            store_at(&memory, base + Duration::seconds(i), "w", &[], None).await;
        }

        let history = memory.get_version_history(3).await;
        assert_eq!(history.len(), 3);
        let versions: Vec<u32> = history.iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn session_history_filters_and_orders() {
        let (_dir, memory) = temp_memory().await;
        let base = Utc::now();

        store_at(&memory, base, "w", &[("step", json!(1))], Some("s1")).await;
        store_at(&memory, base + Duration::seconds(1), "w", &[("step", json!(9))], Some("s2")).await;
        store_at(&memory, base + Duration::seconds(2), "w", &[("step", json!(2))], Some("s1")).await;

        let history = memory.get_session_history("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].step, Some(json!(1)));
        assert_eq!(history[1].step, Some(json!(2)));
    }

    #[tokio::test]
    async fn timestamps_are_totally_ordered() {
        let (_dir, memory) = temp_memory().await;
        let base = Utc::now();
        for i in [3, 1, 2] {
            store_at(&memory, base + Duration::seconds(i), "w", &[], None).await;
        }

        let timestamps = memory.get_all_timestamps().await;
        assert_eq!(timestamps.len(), 3);
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn write_window_reservation_round_trip() {
        let (_dir, memory) = temp_memory().await;

        let reservation = memory
            .reserve_write_window("agent-a", std::time::Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(reservation.agent_id, "agent-a");
        assert!(reservation.expiry > reservation.start_time);

        // A second request within the window returns the same reservation.
        let again = memory
            .reserve_write_window("agent-a", std::time::Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(again.start_time, reservation.start_time);

        // Persisted to the configuration file.
        let path = memory.configuration_dir().join("write_reservations.json");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn expired_reservations_are_evicted() {
        let (_dir, memory) = temp_memory().await;

        memory
            .reserve_write_window("short", std::time::Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        // Re-reserving after expiry yields a fresh window.
        let fresh = memory
            .reserve_write_window("short", std::time::Duration::from_secs(60))
            .await
            .unwrap();
        assert!(fresh.duration_seconds > 1.0);
    }
}
