use chrono::{Duration, NaiveDateTime};

use crate::cooldown::EntryCooldown;
use crate::ledger::{LedgerError, LedgerStore};
use crate::model::{
    Entry, GateSettings, GateSide, Settlement, Violation, REASON_NO_ACTIVE_ENTRY,
    REASON_UNPAID_ENTRY,
};

/// 对闸机的动作要求。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateAction {
    Open,
    Alert,
    Nothing,
}

/// 一次通行决策的结果。
#[derive(Clone, Debug, PartialEq)]
pub enum AccessOutcome {
    /// 入口放行并新建在场记录。
    Admitted { entry: Entry },
    /// 冷却期内重复识别，静默忽略。
    CooldownSkip { plate: String },
    /// 存在未结算记录，拒绝入场。
    DeniedUnpaid { plate: String, violation_id: i64 },
    /// 刚结算过的车辆在宽限期内再次通过出口。
    GraceExit { plate: String, entry_no: i64 },
    /// 出口结算并放行。
    Settled { plate: String, settlement: Settlement },
    /// 无在场记录，拒绝离场并报警。
    DeniedNoActiveEntry { plate: String, violation_id: i64 },
}

impl AccessOutcome {
    pub fn gate_action(&self) -> GateAction {
        match self {
            AccessOutcome::Admitted { .. }
            | AccessOutcome::GraceExit { .. }
            | AccessOutcome::Settled { .. } => GateAction::Open,
            AccessOutcome::DeniedNoActiveEntry { .. } => GateAction::Alert,
            AccessOutcome::CooldownSkip { .. } | AccessOutcome::DeniedUnpaid { .. } => {
                GateAction::Nothing
            }
        }
    }
}

/// 出入口通行策略：结合账本查询与冷却记忆做放行/拒绝决策。
pub struct AccessDecisionEngine {
    side: GateSide,
    gate_location: String,
    rate: f64,
    exit_window: Duration,
    serialize_writes: bool,
    cooldown: EntryCooldown,
}

impl AccessDecisionEngine {
    pub fn new(settings: &GateSettings) -> Self {
        Self {
            side: settings.side,
            gate_location: settings.gate_location.clone(),
            rate: settings.rate,
            exit_window: Duration::minutes(i64::from(settings.exit_window_minutes)),
            serialize_writes: settings.serialize_writes,
            cooldown: EntryCooldown::new(
                settings.entry_cooldown_secs,
                settings.cooldown_scope,
                settings.cooldown_capacity,
            ),
        }
    }

    /// 按闸机位置分派到入口或出口策略。
    pub fn decide(
        &mut self,
        ledger: &LedgerStore,
        plate: &str,
        now: NaiveDateTime,
    ) -> Result<AccessOutcome, LedgerError> {
        match self.side {
            GateSide::Entry => self.decide_entry(ledger, plate, now),
            GateSide::Exit => self.decide_exit(ledger, plate, now),
        }
    }

    /// 入口：未结算拦截优先于冷却判断。
    pub fn decide_entry(
        &mut self,
        ledger: &LedgerStore,
        plate: &str,
        now: NaiveDateTime,
    ) -> Result<AccessOutcome, LedgerError> {
        if ledger.find_unpaid_record(plate)? {
            log::info!("[ACCESS DENIED] Unpaid record exists for {}", plate);
            let violation_id = self.log_violation(ledger, plate, REASON_UNPAID_ENTRY, now)?;
            return Ok(AccessOutcome::DeniedUnpaid {
                plate: plate.to_string(),
                violation_id,
            });
        }

        if self.cooldown.is_cooling(plate, now) {
            log::info!("[SKIPPED] Cooldown: {}", plate);
            return Ok(AccessOutcome::CooldownSkip {
                plate: plate.to_string(),
            });
        }

        let admit = |ledger: &LedgerStore| -> Result<Entry, LedgerError> {
            let no = ledger.next_sequence_number()?;
            let entry = Entry::admit(no, plate, now);
            ledger.insert_active_entry(&entry)?;
            Ok(entry)
        };
        let entry = if self.serialize_writes {
            ledger.locked(admit)?
        } else {
            admit(ledger)?
        };
        self.cooldown.record(plate, now);
        log::info!("[NEW] Logged plate {} as entry #{}", plate, entry.no);
        Ok(AccessOutcome::Admitted { entry })
    }

    /// 出口：宽限期放行 > 结算放行 > 拒绝报警。
    pub fn decide_exit(
        &mut self,
        ledger: &LedgerStore,
        plate: &str,
        now: NaiveDateTime,
    ) -> Result<AccessOutcome, LedgerError> {
        if let Some(done) = ledger.find_recent_completed_exit(plate, self.exit_window, now)? {
            log::info!("[ACCESS GRANTED] Paid exit found for {} (#{})", plate, done.no);
            return Ok(AccessOutcome::GraceExit {
                plate: plate.to_string(),
                entry_no: done.no,
            });
        }

        let rate = self.rate;
        let settle = |ledger: &LedgerStore| -> Result<Option<Settlement>, LedgerError> {
            let Some(active) = ledger.find_most_recent_active_entry(plate)? else {
                return Ok(None);
            };
            let Some(settlement) = active.settlement(now, rate) else {
                return Ok(None);
            };
            ledger.settle_exit(settlement.no, settlement.exit_time, settlement.due_payment)?;
            Ok(Some(settlement))
        };
        let settled = if self.serialize_writes {
            ledger.locked(settle)?
        } else {
            settle(ledger)?
        };

        match settled {
            Some(settlement) => {
                log::info!(
                    "[EXIT] Logged exit for {}, payment: {:.2}",
                    plate,
                    settlement.due_payment
                );
                log::info!("[ACCESS GRANTED] Exit recorded for {}", plate);
                Ok(AccessOutcome::Settled {
                    plate: plate.to_string(),
                    settlement,
                })
            }
            None => {
                log::info!("[ACCESS DENIED] Exit not allowed for {}", plate);
                let violation_id = self.log_violation(ledger, plate, REASON_NO_ACTIVE_ENTRY, now)?;
                Ok(AccessOutcome::DeniedNoActiveEntry {
                    plate: plate.to_string(),
                    violation_id,
                })
            }
        }
    }

    fn log_violation(
        &self,
        ledger: &LedgerStore,
        plate: &str,
        reason: &str,
        now: NaiveDateTime,
    ) -> Result<i64, LedgerError> {
        let violation = Violation::new(now, plate, self.gate_location.as_str(), reason);
        let id = ledger.insert_violation(&violation)?;
        log::info!(
            "[LOGGED] Violation for {} at {}: {}",
            plate,
            self.gate_location,
            reason
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CooldownScope;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn engine(side: GateSide) -> AccessDecisionEngine {
        AccessDecisionEngine::new(&GateSettings::for_side(side))
    }

    #[test]
    fn unpaid_record_blocks_even_inside_cooldown() {
        let ledger = LedgerStore::open_in_memory().unwrap();
        let mut entry = engine(GateSide::Entry);
        let first = entry.decide(&ledger, "RAB123C", t0()).unwrap();
        assert!(matches!(first, AccessOutcome::Admitted { .. }));

        let again = entry
            .decide(&ledger, "RAB123C", t0() + Duration::seconds(30))
            .unwrap();
        assert!(matches!(again, AccessOutcome::DeniedUnpaid { .. }));
        assert_eq!(again.gate_action(), GateAction::Nothing);
        assert_eq!(ledger.count_entries().unwrap(), 1);
        assert_eq!(ledger.count_violations().unwrap(), 1);
    }

    #[test]
    fn cooldown_suppresses_repeat_after_settled_exit() {
        let ledger = LedgerStore::open_in_memory().unwrap();
        let mut entry = engine(GateSide::Entry);
        let mut exit = engine(GateSide::Exit);
        entry.decide(&ledger, "RAB123C", t0()).unwrap();
        exit.decide(&ledger, "RAB123C", t0() + Duration::seconds(60))
            .unwrap();

        let skip = entry
            .decide(&ledger, "RAB123C", t0() + Duration::seconds(120))
            .unwrap();
        assert_eq!(
            skip,
            AccessOutcome::CooldownSkip {
                plate: "RAB123C".to_string()
            }
        );
        assert_eq!(ledger.count_entries().unwrap(), 1);

        let back = entry
            .decide(&ledger, "RAB123C", t0() + Duration::seconds(301))
            .unwrap();
        assert!(matches!(back, AccessOutcome::Admitted { ref entry } if entry.no == 2));
    }

    /// 入场 A、入场 B、A 离场结算、A 在冷却窗口内返回。
    fn return_after_another_grant(entry: &mut AccessDecisionEngine) -> (LedgerStore, AccessOutcome) {
        let ledger = LedgerStore::open_in_memory().unwrap();
        let mut exit = engine(GateSide::Exit);
        entry.decide(&ledger, "RAB123C", t0()).unwrap();
        entry.decide(&ledger, "RAC456D", t0() + Duration::seconds(10)).unwrap();
        let settled = exit
            .decide(&ledger, "RAB123C", t0() + Duration::seconds(20))
            .unwrap();
        assert!(matches!(settled, AccessOutcome::Settled { .. }));
        let outcome = entry
            .decide(&ledger, "RAB123C", t0() + Duration::seconds(30))
            .unwrap();
        (ledger, outcome)
    }

    #[test]
    fn default_cooldown_only_remembers_last_granted_plate() {
        assert_eq!(
            GateSettings::for_side(GateSide::Entry).cooldown_scope,
            CooldownScope::LastPlate
        );
        let mut entry = engine(GateSide::Entry);
        let (ledger, outcome) = return_after_another_grant(&mut entry);
        assert!(matches!(outcome, AccessOutcome::Admitted { ref entry } if entry.no == 3));
        assert_eq!(outcome.gate_action(), GateAction::Open);
        assert_eq!(ledger.count_entries().unwrap(), 3);
    }

    #[test]
    fn per_plate_cooldown_remembers_every_recent_grant() {
        let mut settings = GateSettings::for_side(GateSide::Entry);
        settings.cooldown_scope = CooldownScope::PerPlate;
        let mut entry = AccessDecisionEngine::new(&settings);
        let (ledger, outcome) = return_after_another_grant(&mut entry);
        assert_eq!(
            outcome,
            AccessOutcome::CooldownSkip {
                plate: "RAB123C".to_string()
            }
        );
        assert_eq!(ledger.count_entries().unwrap(), 2);
    }

    #[test]
    fn corrupt_entry_time_stops_exit_settlement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parking.db");
        let ledger = LedgerStore::open(&path).unwrap();
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute(
                "INSERT INTO entries VALUES (1, 'garbage', '', 'RAB123C', NULL, 0)",
                [],
            )
            .unwrap();

        let mut exit = engine(GateSide::Exit);
        let result = exit.decide_exit(&ledger, "RAB123C", t0());
        assert!(matches!(
            result,
            Err(LedgerError::Timestamp { table: "entries", column: "entry_time", .. })
        ));
        assert_eq!(ledger.count_violations().unwrap(), 0);
    }

    #[test]
    fn exit_without_active_entry_raises_alert() {
        let ledger = LedgerStore::open_in_memory().unwrap();
        let mut exit = engine(GateSide::Exit);
        let outcome = exit.decide(&ledger, "RAZ999Z", t0()).unwrap();
        assert!(matches!(outcome, AccessOutcome::DeniedNoActiveEntry { .. }));
        assert_eq!(outcome.gate_action(), GateAction::Alert);
        assert_eq!(ledger.count_violations().unwrap(), 1);
    }

    #[test]
    fn serialized_writes_produce_same_outcomes() {
        let ledger = LedgerStore::open_in_memory().unwrap();
        let mut settings = GateSettings::for_side(GateSide::Entry);
        settings.serialize_writes = true;
        let mut entry = AccessDecisionEngine::new(&settings);
        let mut exit_settings = GateSettings::for_side(GateSide::Exit);
        exit_settings.serialize_writes = true;
        let mut exit = AccessDecisionEngine::new(&exit_settings);

        entry.decide(&ledger, "RAB123C", t0()).unwrap();
        let outcome = exit
            .decide(&ledger, "RAB123C", t0() + Duration::minutes(90))
            .unwrap();
        match outcome {
            AccessOutcome::Settled { settlement, .. } => assert_eq!(settlement.due_payment, 1.5),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
