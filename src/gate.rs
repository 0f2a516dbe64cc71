use chrono::{Duration, NaiveDateTime};

use crate::proto::Actuation;

/// 闸门状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatePhase {
    Closed,
    Open { until: NaiveDateTime },
}

/// 蜂鸣器状态（仅出口）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertPhase {
    Idle,
    Alert { until: NaiveDateTime },
}

/// 单个闸机进程的定时状态机：闸门与蜂鸣器各自独立到期复位。
#[derive(Clone, Debug)]
pub struct GateStateMachine {
    gate: GatePhase,
    alert: AlertPhase,
    alert_enabled: bool,
    open_for: Duration,
    alert_for: Duration,
}

impl GateStateMachine {
    pub fn new(gate_open_secs: u32, buzzer_secs: u32, alert_enabled: bool) -> Self {
        Self {
            gate: GatePhase::Closed,
            alert: AlertPhase::Idle,
            alert_enabled,
            open_for: Duration::seconds(i64::from(gate_open_secs)),
            alert_for: Duration::seconds(i64::from(buzzer_secs)),
        }
    }

    pub fn gate(&self) -> GatePhase {
        self.gate
    }

    pub fn alert(&self) -> AlertPhase {
        self.alert
    }

    pub fn is_open(&self) -> bool {
        matches!(self.gate, GatePhase::Open { .. })
    }

    pub fn is_alerting(&self) -> bool {
        matches!(self.alert, AlertPhase::Alert { .. })
    }

    /// 闸门打开或蜂鸣中时暂停识别与决策。
    pub fn is_busy(&self) -> bool {
        self.is_open() || self.is_alerting()
    }

    /// 放行：开闸并安排自动关闸。
    pub fn open(&mut self, now: NaiveDateTime) -> Actuation {
        self.gate = GatePhase::Open {
            until: now + self.open_for,
        };
        Actuation::OpenGate
    }

    /// 出口拒绝：鸣响并安排自动静音；入口侧不支持时返回 None。
    pub fn raise_alert(&mut self, now: NaiveDateTime) -> Option<Actuation> {
        if !self.alert_enabled {
            return None;
        }
        self.alert = AlertPhase::Alert {
            until: now + self.alert_for,
        };
        Some(Actuation::RaiseAlert)
    }

    /// 每个周期检查到期项，返回需要下发的复位动作。
    pub fn expire(&mut self, now: NaiveDateTime) -> Vec<Actuation> {
        let mut actions = Vec::new();
        if let GatePhase::Open { until } = self.gate {
            if now >= until {
                self.gate = GatePhase::Closed;
                actions.push(Actuation::CloseGate);
            }
        }
        if let AlertPhase::Alert { until } = self.alert {
            if now >= until {
                self.alert = AlertPhase::Idle;
                actions.push(Actuation::ClearAlert);
            }
        }
        actions
    }

    /// 退出时强制复位；若有活动状态则需要下发一次 '0'。
    pub fn force_release(&mut self) -> bool {
        let was_busy = self.is_busy();
        self.gate = GatePhase::Closed;
        self.alert = AlertPhase::Idle;
        was_busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn gate_closes_exactly_at_deadline() {
        let mut machine = GateStateMachine::new(10, 5, false);
        assert_eq!(machine.open(t0()), Actuation::OpenGate);
        assert!(machine.is_busy());
        assert!(machine.expire(t0() + Duration::milliseconds(9_999)).is_empty());
        assert_eq!(
            machine.expire(t0() + Duration::seconds(10)),
            vec![Actuation::CloseGate]
        );
        assert_eq!(machine.gate(), GatePhase::Closed);
        assert!(machine.expire(t0() + Duration::seconds(11)).is_empty());
    }

    #[test]
    fn entry_side_has_no_alert() {
        let mut machine = GateStateMachine::new(10, 5, false);
        assert_eq!(machine.raise_alert(t0()), None);
        assert!(!machine.is_busy());
    }

    #[test]
    fn gate_and_alert_expire_independently() {
        let mut machine = GateStateMachine::new(10, 5, true);
        machine.open(t0());
        assert_eq!(machine.raise_alert(t0() + Duration::seconds(2)), Some(Actuation::RaiseAlert));
        assert_eq!(
            machine.expire(t0() + Duration::seconds(7)),
            vec![Actuation::ClearAlert]
        );
        assert!(machine.is_open());
        assert_eq!(
            machine.expire(t0() + Duration::seconds(10)),
            vec![Actuation::CloseGate]
        );
        assert!(!machine.is_busy());
    }

    #[test]
    fn force_release_reports_prior_activity() {
        let mut machine = GateStateMachine::new(10, 5, true);
        assert!(!machine.force_release());
        machine.raise_alert(t0());
        assert!(machine.force_release());
        assert_eq!(machine.alert(), AlertPhase::Idle);
    }
}
