use chrono::NaiveDateTime;

use crate::model::CooldownScope;

/// 入场冷却：放行后在冷却窗口内忽略同一车牌的重复识别。
pub struct EntryCooldown {
    window_secs: u32,
    scope: CooldownScope,
    max_len: usize,
    entries: Vec<GrantSeen>,
}

struct GrantSeen {
    plate: String,
    granted_at: NaiveDateTime,
}

impl EntryCooldown {
    pub fn new(window_secs: u32, scope: CooldownScope, max_len: usize) -> Self {
        Self {
            window_secs,
            scope,
            max_len: max_len.max(1),
            entries: Vec::new(),
        }
    }

    /// 车牌是否仍在冷却期内（差值 <= 窗口即视为冷却中）。
    pub fn is_cooling(&mut self, plate: &str, now: NaiveDateTime) -> bool {
        self.purge_expired(now);
        self.entries
            .iter()
            .any(|e| e.plate == plate && self.within_window(e.granted_at, now))
    }

    /// 记录一次放行。
    pub fn record(&mut self, plate: &str, now: NaiveDateTime) {
        match self.scope {
            CooldownScope::LastPlate => self.entries.clear(),
            CooldownScope::PerPlate => {
                self.purge_expired(now);
                self.entries.retain(|e| e.plate != plate);
                if self.entries.len() >= self.max_len {
                    self.drop_oldest();
                }
            }
        }
        self.entries.push(GrantSeen {
            plate: plate.to_string(),
            granted_at: now,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn within_window(&self, granted_at: NaiveDateTime, now: NaiveDateTime) -> bool {
        (now - granted_at).num_milliseconds() <= i64::from(self.window_secs) * 1000
    }

    fn purge_expired(&mut self, now: NaiveDateTime) {
        // 单槽模式保留最后一次放行记录
        if self.scope == CooldownScope::LastPlate {
            return;
        }
        let window_ms = i64::from(self.window_secs) * 1000;
        self.entries
            .retain(|e| (now - e.granted_at).num_milliseconds() <= window_ms);
    }

    fn drop_oldest(&mut self) {
        if let Some((idx, _)) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.granted_at)
        {
            self.entries.swap_remove(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn cooling_until_window_elapses() {
        let mut cooldown = EntryCooldown::new(300, CooldownScope::PerPlate, 16);
        cooldown.record("RAB123C", t0());
        assert!(cooldown.is_cooling("RAB123C", t0() + Duration::seconds(60)));
        assert!(cooldown.is_cooling("RAB123C", t0() + Duration::seconds(300)));
        assert!(!cooldown.is_cooling("RAB123C", t0() + Duration::seconds(301)));
        assert!(cooldown.is_empty());
    }

    #[test]
    fn last_plate_scope_forgets_previous_plate() {
        let mut cooldown = EntryCooldown::new(300, CooldownScope::LastPlate, 16);
        cooldown.record("RAB123C", t0());
        cooldown.record("RAC456D", t0() + Duration::seconds(10));
        assert!(!cooldown.is_cooling("RAB123C", t0() + Duration::seconds(20)));
        assert!(cooldown.is_cooling("RAC456D", t0() + Duration::seconds(20)));
        assert_eq!(cooldown.len(), 1);
    }

    #[test]
    fn per_plate_scope_remembers_all_recent_grants() {
        let mut cooldown = EntryCooldown::new(300, CooldownScope::PerPlate, 16);
        cooldown.record("RAB123C", t0());
        cooldown.record("RAC456D", t0() + Duration::seconds(10));
        assert!(cooldown.is_cooling("RAB123C", t0() + Duration::seconds(20)));
        assert!(cooldown.is_cooling("RAC456D", t0() + Duration::seconds(20)));
        assert_eq!(cooldown.len(), 2);
    }

    #[test]
    fn capacity_evicts_oldest_grant() {
        let mut cooldown = EntryCooldown::new(300, CooldownScope::PerPlate, 2);
        cooldown.record("RAA111A", t0());
        cooldown.record("RAB222B", t0() + Duration::seconds(1));
        cooldown.record("RAC333C", t0() + Duration::seconds(2));
        let now = t0() + Duration::seconds(3);
        assert!(!cooldown.is_cooling("RAA111A", now));
        assert!(cooldown.is_cooling("RAB222B", now));
        assert!(cooldown.is_cooling("RAC333C", now));
    }
}
