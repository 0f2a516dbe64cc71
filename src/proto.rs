/// 下发给闸机控制板的单字节指令。
pub const CMD_RELEASE: u8 = b'0';
pub const CMD_OPEN_GATE: u8 = b'1';
pub const CMD_RAISE_ALERT: u8 = b'2';

/// 控制板回传的确认文本（按子串匹配）。
pub const ACK_GATE_OPENED: &str = "[GATE] Opened";
pub const ACK_GATE_CLOSED: &str = "[GATE] Closed";
pub const ACK_ALERT_RAISED: &str = "[ALERT] Unpaid vehicle detected";
pub const ACK_ALERT_CLEARED: &str = "[ALERT] Cleared";

/// 一次执行器动作：指令字节 + 期望的确认文本。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Actuation {
    OpenGate,
    CloseGate,
    RaiseAlert,
    ClearAlert,
}

impl Actuation {
    pub fn command(&self) -> u8 {
        match self {
            Actuation::OpenGate => CMD_OPEN_GATE,
            Actuation::RaiseAlert => CMD_RAISE_ALERT,
            Actuation::CloseGate | Actuation::ClearAlert => CMD_RELEASE,
        }
    }

    pub fn expected_ack(&self) -> &'static str {
        match self {
            Actuation::OpenGate => ACK_GATE_OPENED,
            Actuation::CloseGate => ACK_GATE_CLOSED,
            Actuation::RaiseAlert => ACK_ALERT_RAISED,
            Actuation::ClearAlert => ACK_ALERT_CLEARED,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Actuation::OpenGate => "open_gate",
            Actuation::CloseGate => "close_gate",
            Actuation::RaiseAlert => "raise_alert",
            Actuation::ClearAlert => "clear_alert",
        }
    }
}

/// 确认结果：确认仅作提示，不影响状态切换。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckStatus {
    Confirmed,
    Unconfirmed,
    NoDevice,
}

/// 解析一行距离读数（厘米）。
pub fn parse_distance(line: &str) -> Option<f64> {
    let value = line.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

/// 某行是否包含期望的确认文本。
pub fn line_confirms(line: &str, action: Actuation) -> bool {
    line.contains(action.expected_ack())
}
