use std::fmt;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize, Serializer};

/// 账本中的时间文本格式。
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 违规原因（写入 violations.reason）。
pub const REASON_UNPAID_ENTRY: &str = "Unpaid entry attempt";
pub const REASON_NO_ACTIVE_ENTRY: &str = "No active entry found";

/// 闸机位置（入口/出口）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateSide {
    Entry,
    Exit,
}

impl GateSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateSide::Entry => "entry",
            GateSide::Exit => "exit",
        }
    }

    /// 违规记录里默认使用的位置标签。
    pub fn default_location(&self) -> &'static str {
        match self {
            GateSide::Entry => "Entry",
            GateSide::Exit => "Exit",
        }
    }

    /// 仅出口侧接有蜂鸣器。
    pub fn has_alert(&self) -> bool {
        matches!(self, GateSide::Exit)
    }
}

impl fmt::Display for GateSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 车牌匹配方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateMatch {
    /// OCR 文本必须以前缀开头。
    Prefix,
    /// 在 OCR 文本中查找第一个前缀出现的位置。
    Scan,
}

/// 入场冷却的记忆范围。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownScope {
    /// 只记住上一次放行的车牌。
    LastPlate,
    /// 记住冷却期内放行过的所有车牌。
    PerPlate,
}

/// 闸机运行参数（可配置项）。
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct GateSettings {
    pub side: GateSide,
    pub gate_location: String,
    pub db_file: String,
    pub serial_port: Option<String>,
    pub baud_rate: u32,
    pub entry_cooldown_secs: u32,
    pub min_distance: f64,
    pub max_distance: f64,
    pub capture_threshold: usize,
    pub gate_open_secs: u32,
    pub buzzer_secs: u32,
    pub exit_window_minutes: u32,
    pub rate: f64,
    pub plate_prefix: String,
    pub plate_match: Option<PlateMatch>,
    pub cooldown_scope: CooldownScope,
    pub cooldown_capacity: usize,
    pub ack_timeout_ms: u64,
    pub ack_poll_ms: u64,
    pub idle_tick_ms: u64,
    pub serialize_writes: bool,
}

impl GateSettings {
    /// 使用指定闸机位置构建默认参数。
    pub fn for_side(side: GateSide) -> Self {
        Self {
            side,
            gate_location: side.default_location().to_string(),
            db_file: option_env!("PARKING_DB_FILE")
                .unwrap_or("parking.db")
                .to_string(),
            serial_port: option_env!("PARKING_SERIAL_PORT").map(str::to_string),
            baud_rate: 115_200,
            entry_cooldown_secs: 300,
            min_distance: 0.0,
            max_distance: 20.0,
            capture_threshold: 6,
            gate_open_secs: 10,
            buzzer_secs: 5,
            exit_window_minutes: 5,
            rate: 1.0,
            plate_prefix: "RA".to_string(),
            plate_match: None,
            cooldown_scope: CooldownScope::LastPlate,
            cooldown_capacity: 128,
            ack_timeout_ms: 2000,
            ack_poll_ms: 10,
            idle_tick_ms: 10,
            serialize_writes: false,
        }
    }

    /// 未显式配置时按闸机位置选择匹配方式。
    pub fn effective_plate_match(&self) -> PlateMatch {
        self.plate_match.unwrap_or(match self.side {
            GateSide::Entry => PlateMatch::Prefix,
            GateSide::Exit => PlateMatch::Scan,
        })
    }

    /// 距离读数是否落在触发区间内。
    pub fn in_range(&self, distance: f64) -> bool {
        self.min_distance <= distance && distance <= self.max_distance
    }

    /// 无读数时替代的距离（落在触发区间内）。
    pub fn fallback_distance(&self) -> f64 {
        let candidate = self.max_distance - 1.0;
        if self.in_range(candidate) {
            candidate
        } else {
            self.min_distance
        }
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        Self::for_side(GateSide::Entry)
    }
}

/// 停车记录（entries 表的一行）。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Entry {
    pub no: i64,
    #[serde(serialize_with = "serialize_timestamp")]
    pub entry_time: NaiveDateTime,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub exit_time: Option<NaiveDateTime>,
    #[serde(rename = "car_plate")]
    pub plate: String,
    pub due_payment: Option<f64>,
    #[serde(rename = "payment_status", serialize_with = "serialize_flag")]
    pub paid: bool,
}

impl Entry {
    /// 新入场记录：未离场、未结算。
    pub fn admit(no: i64, plate: impl Into<String>, entry_time: NaiveDateTime) -> Self {
        Self {
            no,
            entry_time: truncate_to_seconds(entry_time),
            exit_time: None,
            plate: plate.into(),
            due_payment: None,
            paid: false,
        }
    }

    /// 在场且未结算。
    pub fn is_active(&self) -> bool {
        self.exit_time.is_none() && !self.paid
    }

    /// 已离场且已结算。
    pub fn is_completed(&self) -> bool {
        self.exit_time.is_some() && self.paid
    }

    /// 计算离场应付金额；已结算的记录不能再次结算。
    pub fn settlement(&self, exit_time: NaiveDateTime, rate: f64) -> Option<Settlement> {
        if !self.is_active() {
            return None;
        }
        let exit_time = truncate_to_seconds(exit_time);
        let hours = hours_between(self.entry_time, exit_time);
        Some(Settlement {
            no: self.no,
            exit_time,
            due_payment: round_currency(hours * rate),
        })
    }
}

/// 一次离场结算的结果。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Settlement {
    pub no: i64,
    pub exit_time: NaiveDateTime,
    pub due_payment: f64,
}

/// 违规记录（violations 表的一行）。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Violation {
    pub id: Option<i64>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "car_plate")]
    pub plate: String,
    pub gate_location: String,
    pub reason: String,
}

impl Violation {
    pub fn new(
        timestamp: NaiveDateTime,
        plate: impl Into<String>,
        gate_location: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp: truncate_to_seconds(timestamp),
            plate: plate.into(),
            gate_location: gate_location.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Entry {
    /// 便于日志输出的格式化展示。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} in={} out={} due={:?} paid={}",
            self.no,
            self.plate,
            format_timestamp(self.entry_time),
            self.exit_time.map(format_timestamp).unwrap_or_default(),
            self.due_payment,
            self.paid
        )
    }
}

/// 时间转为账本文本格式。
pub fn format_timestamp(time: NaiveDateTime) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// 解析账本文本时间。
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
}

/// 两个时间点之间的小时数（实数）。
pub fn hours_between(start: NaiveDateTime, end: NaiveDateTime) -> f64 {
    (end - start).num_seconds() as f64 / 3600.0
}

/// 金额保留两位小数（四舍五入，远离零）。
pub fn round_currency(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 账本只保存到秒。
fn truncate_to_seconds(time: NaiveDateTime) -> NaiveDateTime {
    time.with_nanosecond(0).unwrap_or(time)
}

fn serialize_timestamp<S: Serializer>(time: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(*time))
}

fn serialize_flag<S: Serializer>(flag: &bool, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u8(u8::from(*flag))
}

fn serialize_optional_timestamp<S: Serializer>(
    time: &Option<NaiveDateTime>,
    s: S,
) -> Result<S::Ok, S::Error> {
    // 未离场在账本中以空字符串表示
    match time {
        Some(time) => s.serialize_str(&format_timestamp(*time)),
        None => s.serialize_str(""),
    }
}
