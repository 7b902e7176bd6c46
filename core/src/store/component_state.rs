//! Per-component state rows written alongside each snapshot.

use super::SimStore;
use crate::{error::SimResult, subsystem::StateEntry, types::Tick};
use rusqlite::params;

impl SimStore {
    /// Replace one component's rows for a snapshot tick.
    /// Entry order is preserved through `seq`.
    pub fn save_component_state(
        &mut self,
        run_id: &str,
        tick: Tick,
        component: &str,
        entries: &[StateEntry],
    ) -> SimResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM component_state WHERE run_id = ?1 AND tick = ?2 AND component = ?3",
            params![run_id, tick as i64, component],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO component_state (run_id, tick, component, seq, state_key, state_value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (seq, (key, value)) in entries.iter().enumerate() {
                stmt.execute(params![run_id, tick as i64, component, seq as i64, key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_component_state(
        &self,
        run_id: &str,
        tick: Tick,
        component: &str,
    ) -> SimResult<Vec<StateEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT state_key, state_value FROM component_state
             WHERE run_id = ?1 AND tick = ?2 AND component = ?3
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![run_id, tick as i64, component], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok(result)
    }

    pub fn component_state_count(&self, run_id: &str, tick: Tick) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM component_state WHERE run_id = ?1 AND tick = ?2",
            params![run_id, tick as i64],
            |r| r.get(0),
        )?)
    }
}
