use std::path::Path;
use std::time::Duration;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use thiserror::Error;

use crate::model::{format_timestamp, parse_timestamp, Entry, Violation};

/// 多进程共享同一数据库文件时的忙等待上限。
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    no INTEGER PRIMARY KEY,
    entry_time TEXT,
    exit_time TEXT,
    car_plate TEXT,
    due_payment REAL,
    payment_status INTEGER
);
CREATE TABLE IF NOT EXISTS violations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT,
    car_plate TEXT,
    gate_location TEXT,
    reason TEXT
);
";

const ENTRY_COLUMNS: &str = "no, entry_time, exit_time, car_plate, due_payment, payment_status";
const VIOLATION_COLUMNS: &str = "id, timestamp, car_plate, gate_location, reason";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid timestamp {value:?} in {table}.{column}")]
    Timestamp {
        table: &'static str,
        column: &'static str,
        value: String,
    },
    #[error("entry #{0} is not active")]
    NotActive(i64),
}

/// 停车账本：entries 与 violations 两张表的唯一写入者。
///
/// 每个操作单独提交；同一文件有多个写入进程时，
/// 通过 [`LedgerStore::locked`] 把分配序号与插入包进同一事务。
pub struct LedgerStore {
    conn: Connection,
}

impl LedgerStore {
    /// 打开（必要时创建）账本文件。
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// 下一个入场序号：max(no) + 1。
    pub fn next_sequence_number(&self) -> Result<i64, LedgerError> {
        let next = self.conn.query_row(
            "SELECT COALESCE(MAX(no), 0) + 1 FROM entries",
            [],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    pub fn insert_active_entry(&self, entry: &Entry) -> Result<(), LedgerError> {
        self.conn.execute(
            "INSERT INTO entries (no, entry_time, exit_time, car_plate, due_payment, payment_status)
             VALUES (?1, ?2, '', ?3, NULL, 0)",
            params![entry.no, format_timestamp(entry.entry_time), entry.plate],
        )?;
        Ok(())
    }

    /// 该车牌是否存在未结算记录。
    pub fn find_unpaid_record(&self, plate: &str) -> Result<bool, LedgerError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM entries WHERE car_plate = ?1 AND payment_status = 0 LIMIT 1",
                params![plate],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// 该车牌最近一次入场且尚未离场的记录。
    pub fn find_most_recent_active_entry(&self, plate: &str) -> Result<Option<Entry>, LedgerError> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries
                     WHERE car_plate = ?1 AND exit_time = '' AND payment_status = 0
                     ORDER BY entry_time DESC LIMIT 1"
                ),
                params![plate],
                RawEntry::from_row,
            )
            .optional()?;
        raw.map(RawEntry::into_entry).transpose()
    }

    /// 在宽限窗口内完成离场的记录；离场时间损坏的行跳过。
    pub fn find_recent_completed_exit(
        &self,
        plate: &str,
        window: chrono::Duration,
        now: NaiveDateTime,
    ) -> Result<Option<Entry>, LedgerError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE car_plate = ?1 AND exit_time != '' AND payment_status = 1
             ORDER BY exit_time DESC"
        ))?;
        let rows = stmt.query_map(params![plate], RawEntry::from_row)?;
        for raw in rows {
            let raw = raw?;
            let no = raw.no;
            let entry = match raw.into_entry() {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("skip entry #{} for {}: {}", no, plate, err);
                    continue;
                }
            };
            let Some(exit_time) = entry.exit_time else {
                continue;
            };
            if now - exit_time <= window {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// 结算离场；仅对未结算记录生效，保证 payment_status 只翻转一次。
    pub fn settle_exit(
        &self,
        no: i64,
        exit_time: NaiveDateTime,
        due_payment: f64,
    ) -> Result<(), LedgerError> {
        let changed = self.conn.execute(
            "UPDATE entries SET exit_time = ?1, due_payment = ?2, payment_status = 1
             WHERE no = ?3 AND payment_status = 0",
            params![format_timestamp(exit_time), due_payment, no],
        )?;
        if changed == 0 {
            return Err(LedgerError::NotActive(no));
        }
        Ok(())
    }

    pub fn insert_violation(&self, violation: &Violation) -> Result<i64, LedgerError> {
        self.conn.execute(
            "INSERT INTO violations (timestamp, car_plate, gate_location, reason)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                format_timestamp(violation.timestamp),
                violation.plate,
                violation.gate_location,
                violation.reason
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn entry(&self, no: i64) -> Result<Option<Entry>, LedgerError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE no = ?1"),
                params![no],
                RawEntry::from_row,
            )
            .optional()?;
        raw.map(RawEntry::into_entry).transpose()
    }

    pub fn count_entries(&self) -> Result<i64, LedgerError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?)
    }

    pub fn count_violations(&self) -> Result<i64, LedgerError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM violations", [], |row| row.get(0))?)
    }

    /// 在 BEGIN IMMEDIATE 事务中执行一组操作，失败自动回滚。
    pub fn locked<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Self) -> Result<T, LedgerError>,
    {
        let guard = TransactionGuard::begin(&self.conn)?;
        let value = f(self)?;
        guard.commit()?;
        Ok(value)
    }
}

/// 事务守卫：未提交即在 drop 时回滚。
struct TransactionGuard<'a> {
    conn: &'a Connection,
    committed: bool,
}

impl<'a> TransactionGuard<'a> {
    fn begin(conn: &'a Connection) -> Result<Self, LedgerError> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            committed: false,
        })
    }

    fn commit(mut self) -> Result<(), LedgerError> {
        self.conn.execute_batch("COMMIT")?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

/// 报表只读查询（对应 UI 的四类列表），以只读方式打开账本文件。
pub struct ReportQueries {
    conn: Connection,
}

impl ReportQueries {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    /// 在场车辆。
    pub fn active_entries(&self) -> Result<Vec<Entry>, LedgerError> {
        self.entries_where("exit_time = '' ORDER BY entry_time DESC")
    }

    /// 已离场并结算。
    pub fn settled_exits(&self) -> Result<Vec<Entry>, LedgerError> {
        self.entries_where("exit_time != '' AND payment_status = 1 ORDER BY exit_time DESC")
    }

    /// 已缴费记录。
    pub fn paid_records(&self) -> Result<Vec<Entry>, LedgerError> {
        self.entries_where("payment_status = 1 AND due_payment IS NOT NULL ORDER BY exit_time DESC")
    }

    /// 违规记录；时间戳损坏的行跳过并告警。
    pub fn violations(&self) -> Result<Vec<Violation>, LedgerError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM violations ORDER BY timestamp DESC"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, timestamp, plate, gate_location, reason) = row?;
            let Ok(timestamp) = parse_timestamp(&timestamp) else {
                log::warn!("skip violation #{}: invalid timestamp {:?}", id, timestamp);
                continue;
            };
            let mut violation = Violation::new(timestamp, plate, gate_location, reason);
            violation.id = Some(id);
            out.push(violation);
        }
        Ok(out)
    }

    fn entries_where(&self, clause: &str) -> Result<Vec<Entry>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE {clause}"))?;
        let rows = stmt.query_map([], RawEntry::from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(raw?.into_entry()?);
        }
        Ok(out)
    }
}

/// entries 行的原始文本形态。
struct RawEntry {
    no: i64,
    entry_time: String,
    exit_time: Option<String>,
    plate: String,
    due_payment: Option<f64>,
    payment_status: i64,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            no: row.get(0)?,
            entry_time: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            exit_time: row.get(2)?,
            plate: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            due_payment: row.get(4)?,
            payment_status: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        })
    }

    fn into_entry(self) -> Result<Entry, LedgerError> {
        let entry_time = parse_timestamp(&self.entry_time).map_err(|_| LedgerError::Timestamp {
            table: "entries",
            column: "entry_time",
            value: self.entry_time.clone(),
        })?;
        // 空字符串表示尚未离场
        let exit_time = match self.exit_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(parse_timestamp(text).map_err(|_| LedgerError::Timestamp {
                table: "entries",
                column: "exit_time",
                value: text.to_string(),
            })?),
        };
        Ok(Entry {
            no: self.no,
            entry_time,
            exit_time,
            plate: self.plate,
            due_payment: self.due_payment,
            paid: self.payment_status != 0,
        })
    }
}
