use std::collections::VecDeque;
use std::fmt::Write as _;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::clock::{poll_until, Clock};
use crate::proto::{line_confirms, parse_distance, AckStatus, Actuation};
use crate::serial_io::{push_bytes_to_lines, ActuatorPort, LineReader};

/// 打开串口后控制板复位所需的等待时间。
const SETTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("serial io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),
}

/// 与闸机控制板的串口链路（指令 + 确认 + 距离读数）。
pub struct ActuatorLink {
    port: Box<dyn ActuatorPort>,
    reader: LineReader,
    lines: VecDeque<String>,
    clock: Arc<dyn Clock>,
    ack_timeout: Duration,
    poll_interval: Duration,
}

impl ActuatorLink {
    pub fn new(port: Box<dyn ActuatorPort>, clock: Arc<dyn Clock>) -> Self {
        Self {
            port,
            reader: LineReader::new(),
            lines: VecDeque::new(),
            clock,
            ack_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        }
    }

    pub fn with_ack_timing(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.ack_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// 等待控制板复位后清空输入。
    pub fn settle(&mut self) -> Result<(), ActuatorError> {
        self.clock.sleep(SETTLE_DELAY);
        self.discard_input()
    }

    /// 下发指令并在超时内等待确认；未确认只记录日志，不回滚。
    pub fn send(&mut self, action: Actuation) -> Result<AckStatus, ActuatorError> {
        self.discard_input()?;
        let command = [action.command()];
        log_bytes("SERIAL TX:", &command);
        self.port.write_all(&command)?;

        let clock = Arc::clone(&self.clock);
        let (timeout, interval) = (self.ack_timeout, self.poll_interval);
        let mut failure: Option<ActuatorError> = None;
        let confirmed = poll_until(clock.as_ref(), timeout, interval, || {
            if failure.is_some() {
                return false;
            }
            match self.take_ack(action) {
                Ok(found) => found,
                Err(err) => {
                    failure = Some(err);
                    false
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }
        if confirmed {
            log::debug!("{} confirmed", action.as_str());
            Ok(AckStatus::Confirmed)
        } else {
            log::warn!(
                "{} not confirmed within {:?} (expected {:?})",
                action.as_str(),
                self.ack_timeout,
                action.expected_ack()
            );
            Ok(AckStatus::Unconfirmed)
        }
    }

    /// 非阻塞读取距离；无数据或无法解析时返回 None。
    pub fn read_distance(&mut self) -> Result<Option<f64>, ActuatorError> {
        self.fill_lines()?;
        let Some(line) = self.lines.pop_front() else {
            return Ok(None);
        };
        let distance = parse_distance(&line);
        if distance.is_none() {
            log::debug!("SERIAL RX (not a distance): {}", line);
        }
        Ok(distance)
    }

    /// 尽力复位闸门/蜂鸣器（关闭流程使用，不等待确认）。
    pub fn release_best_effort(&mut self) {
        let command = [Actuation::CloseGate.command()];
        if let Err(err) = self.port.write_all(&command) {
            log::warn!("release command failed: {}", err);
            return;
        }
        self.clock.sleep(Duration::from_millis(100));
    }

    fn take_ack(&mut self, action: Actuation) -> Result<bool, ActuatorError> {
        self.fill_lines()?;
        // 逐行消费，无关行直接丢弃
        while let Some(line) = self.lines.pop_front() {
            log::debug!("SERIAL RX: {}", line);
            if line_confirms(&line, action) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn fill_lines(&mut self) -> Result<(), ActuatorError> {
        let available = self.port.bytes_to_read()?;
        if available == 0 {
            return Ok(());
        }
        let mut buf = vec![0u8; available.min(1024)];
        let count = self.port.read(&mut buf)?;
        push_bytes_to_lines(&mut self.reader, &buf[..count], &mut self.lines);
        Ok(())
    }

    fn discard_input(&mut self) -> Result<(), ActuatorError> {
        self.port.discard_input()?;
        self.reader.reset();
        self.lines.clear();
        Ok(())
    }
}

/// 按平台匹配控制板设备名。
pub fn device_matches(os: &str, device: &str) -> bool {
    match os {
        "linux" => device.contains("ttyACM"),
        "macos" => device.contains("usbmodem") || device.contains("usbserial"),
        "windows" => device.contains("COM"),
        _ => false,
    }
}

/// 在设备列表中选择第一个匹配的控制板。
pub fn select_device<'a, I>(os: &str, devices: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    devices
        .into_iter()
        .find(|device| device_matches(os, device))
        .map(str::to_string)
}

/// 枚举本机串口设备。
pub fn list_devices() -> Result<Vec<String>, ActuatorError> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}

/// 启动时探测一次控制板串口。
pub fn discover_device() -> Result<Option<String>, ActuatorError> {
    let devices = list_devices()?;
    Ok(select_device(
        std::env::consts::OS,
        devices.iter().map(String::as_str),
    ))
}

/// 打开控制板串口。
pub fn open_serial(path: &str, baud_rate: u32) -> Result<Box<dyn ActuatorPort>, ActuatorError> {
    let port = serialport::new(path, baud_rate)
        .timeout(Duration::from_millis(100))
        .open()?;
    Ok(Box::new(port))
}

fn log_bytes(prefix: &str, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    let mut line = String::with_capacity(prefix.len() + bytes.len() * 3);
    line.push_str(prefix);
    line.push(' ');
    for (idx, byte) in bytes.iter().enumerate() {
        if idx > 0 {
            line.push(' ');
        }
        let _ = write!(line, "{:02X}", byte);
    }
    log::debug!("{}", line);
}
