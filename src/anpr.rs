//! 车牌识别（ANPR）外部协作方接口。
//!
//! 定位车牌与 OCR 均在核心之外完成，这里只约定数据形态：
//! 一帧图像 -> 若干候选区域 -> 每个区域一段识别文本。

use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("frame source closed")]
    Closed,
    #[error("frame capture failed: {0}")]
    Failed(String),
}

/// 一帧图像（原始字节 + 尺寸）。
#[derive(Clone, Debug, Default)]
pub struct Frame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// 轴对齐的候选区域（左上/右下像素坐标）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    pub fn full(frame: &Frame) -> Self {
        Self {
            x1: 0,
            y1: 0,
            x2: frame.width,
            y2: frame.height,
        }
    }
}

/// 帧来源；Ok(None) 表示本周期暂无新帧。
pub trait FrameSource {
    fn grab(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// 车牌定位器。
pub trait PlateDetector {
    fn detect(&mut self, frame: &Frame) -> Vec<Region>;
}

/// OCR：返回大写字母数字文本，识别失败返回空串。
pub trait PlateOcr {
    fn recognize(&mut self, frame: &Frame, region: &Region) -> String;
}

/// 定位 + OCR 组合：一帧得到若干识别文本。
pub struct Recognizer<D, O> {
    detector: D,
    ocr: O,
}

impl<D: PlateDetector, O: PlateOcr> Recognizer<D, O> {
    pub fn new(detector: D, ocr: O) -> Self {
        Self { detector, ocr }
    }

    pub fn read_frame(&mut self, frame: &Frame) -> Vec<String> {
        let regions = self.detector.detect(frame);
        regions
            .iter()
            .map(|region| self.ocr.recognize(frame, region))
            .filter(|text| !text.is_empty())
            .collect()
    }
}

/// 外部识别进程通过文本行送入结果：每行视为一帧、一个整帧区域。
pub struct LineFeed {
    rx: Receiver<String>,
    next_index: u64,
}

impl LineFeed {
    /// 后台线程逐行读取，主循环非阻塞取用。
    ///
    /// 非 UTF-8 的行按有损转换送出（随后由车牌校验丢弃），只有 EOF 或 I/O 错误才结束。
    pub fn spawn<R>(mut input: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match input.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf)
                            .trim_end_matches(|c: char| c == '\n' || c == '\r')
                            .to_string();
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        log::warn!("ANPR feed read error: {}", err);
                        break;
                    }
                }
            }
        });
        Self { rx, next_index: 0 }
    }

    pub fn from_receiver(rx: Receiver<String>) -> Self {
        Self { rx, next_index: 0 }
    }
}

impl FrameSource for LineFeed {
    fn grab(&mut self) -> Result<Option<Frame>, CaptureError> {
        match self.rx.try_recv() {
            Ok(line) => {
                let data = line.into_bytes();
                let frame = Frame {
                    index: self.next_index,
                    width: data.len() as u32,
                    height: 1,
                    data,
                };
                self.next_index += 1;
                Ok(Some(frame))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(CaptureError::Closed),
        }
    }
}

/// 文本帧的定位：非空即为一个整帧区域。
#[derive(Clone, Copy, Debug, Default)]
pub struct WholeFrame;

impl PlateDetector for WholeFrame {
    fn detect(&mut self, frame: &Frame) -> Vec<Region> {
        if frame.data.is_empty() {
            return Vec::new();
        }
        vec![Region::full(frame)]
    }
}

/// 文本帧的 OCR：区域内的字节即识别结果。
#[derive(Clone, Copy, Debug, Default)]
pub struct TextOcr;

impl PlateOcr for TextOcr {
    fn recognize(&mut self, frame: &Frame, region: &Region) -> String {
        let start = (region.x1 as usize).min(frame.data.len());
        let end = (region.x2 as usize).min(frame.data.len()).max(start);
        String::from_utf8_lossy(&frame.data[start..end])
            .trim()
            .to_string()
    }
}
