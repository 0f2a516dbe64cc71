use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};

/// 时钟抽象：墙钟时间 + 让出执行（测试时可注入虚拟时间）。
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
    fn sleep(&self, duration: Duration);
}

/// 系统本地时间。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// 手动推进的虚拟时钟：sleep 直接推进时间，不真正等待。
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        if let Ok(mut now) = self.now.lock() {
            *now += chrono::Duration::seconds(secs);
        }
    }

    pub fn set(&self, time: NaiveDateTime) {
        if let Ok(mut now) = self.now.lock() {
            *now = time;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// 在超时前按固定间隔轮询条件，返回是否满足。
pub fn poll_until<C, F>(clock: &C, timeout: Duration, interval: Duration, mut ready: F) -> bool
where
    C: Clock + ?Sized,
    F: FnMut() -> bool,
{
    let start = clock.now();
    let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());
    while clock.now() - start < timeout {
        if ready() {
            return true;
        }
        clock.sleep(interval);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn manual_clock_sleep_advances_time() {
        let clock = ManualClock::new(start());
        clock.sleep(Duration::from_millis(1500));
        assert_eq!(clock.now(), start() + chrono::Duration::milliseconds(1500));
    }

    #[test]
    fn poll_gives_up_after_timeout() {
        let clock = ManualClock::new(start());
        let mut calls = 0;
        let ok = poll_until(
            &clock,
            Duration::from_secs(2),
            Duration::from_millis(10),
            || {
                calls += 1;
                false
            },
        );
        assert!(!ok);
        assert_eq!(calls, 200);
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(2));
    }

    #[test]
    fn poll_returns_as_soon_as_ready() {
        let clock = ManualClock::new(start());
        let mut calls = 0;
        let ok = poll_until(
            &clock,
            Duration::from_secs(2),
            Duration::from_millis(10),
            || {
                calls += 1;
                calls == 3
            },
        );
        assert!(ok);
        assert_eq!(clock.now(), start() + chrono::Duration::milliseconds(20));
    }
}
