use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::proto::{
    ACK_ALERT_CLEARED, ACK_ALERT_RAISED, ACK_GATE_CLOSED, ACK_GATE_OPENED, CMD_OPEN_GATE,
    CMD_RAISE_ALERT, CMD_RELEASE,
};

/// 单行最大长度，超出则丢弃（防止噪声撑爆缓冲）。
const MAX_LINE_LEN: usize = 256;

/// 闸机控制板串口抽象（非阻塞读 + 整块写）。
pub trait ActuatorPort: Send {
    /// 当前可读字节数（不阻塞）。
    fn bytes_to_read(&mut self) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// 丢弃设备侧尚未读取的输入。
    fn discard_input(&mut self) -> io::Result<()>;
}

impl ActuatorPort for Box<dyn serialport::SerialPort> {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let count = serialport::SerialPort::bytes_to_read(self.as_ref())?;
        Ok(count as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(self, bytes)?;
        Write::flush(self)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}

/// 行读取器：逐字节组装完整文本行。
pub struct LineReader {
    buffer: Vec<u8>,
    overflow: bool,
}

impl LineReader {
    /// 创建新的行读取器。
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            overflow: false,
        }
    }

    /// 推入一个字节，遇到换行时返回整行（去除首尾空白）。
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte == b'\n' {
            let overflow = self.overflow;
            let line = String::from_utf8_lossy(&self.buffer).trim().to_string();
            self.reset();
            if overflow {
                return None;
            }
            return Some(line);
        }
        if self.buffer.len() >= MAX_LINE_LEN {
            self.overflow = true;
            return None;
        }
        self.buffer.push(byte);
        None
    }

    /// 重置内部状态（丢弃未完成的行）。
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflow = false;
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

/// 逐字节喂给读取器，把完整行追加到队列。
pub fn push_bytes_to_lines(reader: &mut LineReader, bytes: &[u8], lines: &mut VecDeque<String>) {
    for &byte in bytes {
        if let Some(line) = reader.push(byte) {
            if !line.is_empty() {
                lines.push_back(line);
            }
        }
    }
}

/// 控制板模拟器：按固件行为回传确认，可注入距离读数。
#[derive(Clone, Default)]
pub struct SimulatedController {
    inner: Arc<Mutex<SimulatedInner>>,
}

#[derive(Default)]
struct SimulatedInner {
    pending: VecDeque<u8>,
    written: Vec<u8>,
    gate_open: bool,
    alert_active: bool,
    silent: bool,
}

impl SimulatedController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 不回传任何确认（模拟固件无响应）。
    pub fn silent() -> Self {
        let controller = Self::default();
        controller.with_inner(|inner| inner.silent = true);
        controller
    }

    /// 注入一行设备输出（如距离读数）。
    pub fn push_line(&self, line: &str) {
        self.with_inner(|inner| {
            inner.pending.extend(line.as_bytes());
            inner.pending.push_back(b'\n');
        });
    }

    /// 主机下发过的全部指令字节。
    pub fn written(&self) -> Vec<u8> {
        self.with_inner(|inner| inner.written.clone())
    }

    pub fn gate_open(&self) -> bool {
        self.with_inner(|inner| inner.gate_open)
    }

    pub fn alert_active(&self) -> bool {
        self.with_inner(|inner| inner.alert_active)
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut SimulatedInner) -> T) -> T {
        match self.inner.lock() {
            Ok(mut inner) => f(&mut inner),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl SimulatedInner {
    fn apply(&mut self, command: u8) {
        let mut acks: Vec<&str> = Vec::new();
        match command {
            CMD_OPEN_GATE => {
                self.gate_open = true;
                acks.push(ACK_GATE_OPENED);
            }
            CMD_RAISE_ALERT => {
                self.alert_active = true;
                acks.push(ACK_ALERT_RAISED);
            }
            CMD_RELEASE => {
                // 固件对 '0' 同时复位闸门与蜂鸣器
                if self.gate_open {
                    acks.push(ACK_GATE_CLOSED);
                }
                if self.alert_active {
                    acks.push(ACK_ALERT_CLEARED);
                }
                self.gate_open = false;
                self.alert_active = false;
            }
            _ => {}
        }
        if self.silent {
            return;
        }
        for ack in acks {
            self.pending.extend(ack.as_bytes());
            self.pending.extend(b"\r\n");
        }
    }
}

impl ActuatorPort for SimulatedController {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.with_inner(|inner| inner.pending.len()))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.with_inner(|inner| {
            let count = buf.len().min(inner.pending.len());
            for (slot, byte) in buf.iter_mut().zip(inner.pending.drain(..count)) {
                *slot = byte;
            }
            count
        }))
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.with_inner(|inner| {
            for &byte in bytes {
                inner.written.push(byte);
                inner.apply(byte);
            }
        });
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.with_inner(|inner| inner.pending.clear());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_splits_lines_and_trims_carriage_return() {
        let mut reader = LineReader::new();
        let mut lines = VecDeque::new();
        push_bytes_to_lines(&mut reader, b"15.2\r\n[GATE] Op", &mut lines);
        assert_eq!(lines.pop_front().as_deref(), Some("15.2"));
        assert!(lines.is_empty());
        push_bytes_to_lines(&mut reader, b"ened\r\n\r\n", &mut lines);
        assert_eq!(lines.pop_front().as_deref(), Some("[GATE] Opened"));
        assert!(lines.is_empty());
    }

    #[test]
    fn overlong_line_is_dropped() {
        let mut reader = LineReader::new();
        let mut lines = VecDeque::new();
        let noise = vec![b'x'; MAX_LINE_LEN + 10];
        push_bytes_to_lines(&mut reader, &noise, &mut lines);
        push_bytes_to_lines(&mut reader, b"\n12\n", &mut lines);
        assert_eq!(lines.into_iter().collect::<Vec<_>>(), vec!["12".to_string()]);
    }

    #[test]
    fn simulator_acks_follow_firmware_state() {
        let mut sim = SimulatedController::new();
        sim.write_all(b"1").unwrap();
        assert!(sim.gate_open());
        let mut buf = [0u8; 64];
        let n = sim.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"[GATE] Opened\r\n");

        sim.write_all(b"0").unwrap();
        assert!(!sim.gate_open());
        let n = sim.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"[GATE] Closed\r\n");
        assert_eq!(sim.written(), b"10".to_vec());
    }

    #[test]
    fn silent_simulator_tracks_state_without_acks() {
        let mut sim = SimulatedController::silent();
        sim.write_all(b"2").unwrap();
        assert!(sim.alert_active());
        assert_eq!(sim.bytes_to_read().unwrap(), 0);
    }
}
