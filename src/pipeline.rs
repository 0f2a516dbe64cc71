use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::access::{AccessDecisionEngine, AccessOutcome, GateAction};
use crate::actuator::{ActuatorError, ActuatorLink};
use crate::anpr::{CaptureError, Frame, FrameSource, PlateDetector, PlateOcr, Recognizer};
use crate::clock::Clock;
use crate::consensus::ConsensusBuffer;
use crate::gate::GateStateMachine;
use crate::ledger::{LedgerError, LedgerStore};
use crate::model::GateSettings;
use crate::plate::PlateValidator;
use crate::proto::{AckStatus, Actuation};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// 单个周期的执行结果（供日志与测试观察）。
#[derive(Debug, Default)]
pub struct TickReport {
    pub distance: f64,
    pub distance_read: bool,
    pub detection_ran: bool,
    pub decisions: Vec<AccessOutcome>,
    pub actions: Vec<(Actuation, AckStatus)>,
}

/// 单个闸机进程的控制循环：测距 -> 定时复位 -> 识别 -> 决策 -> 执行。
pub struct ControlLoop<S, D, O> {
    settings: GateSettings,
    ledger: LedgerStore,
    actuator: Option<ActuatorLink>,
    clock: Arc<dyn Clock>,
    source: S,
    recognizer: Recognizer<D, O>,
    validator: PlateValidator,
    consensus: ConsensusBuffer,
    gate: GateStateMachine,
    engine: AccessDecisionEngine,
}

impl<S, D, O> ControlLoop<S, D, O>
where
    S: FrameSource,
    D: PlateDetector,
    O: PlateOcr,
{
    pub fn new(
        settings: GateSettings,
        ledger: LedgerStore,
        actuator: Option<ActuatorLink>,
        clock: Arc<dyn Clock>,
        source: S,
        recognizer: Recognizer<D, O>,
    ) -> Self {
        let actuator = actuator.map(|link| {
            link.with_ack_timing(
                Duration::from_millis(settings.ack_timeout_ms),
                Duration::from_millis(settings.ack_poll_ms),
            )
        });
        if actuator.is_none() {
            log::warn!("[SYSTEM] No actuator attached: running detection/ledger-only");
        }
        Self {
            validator: PlateValidator::new(
                settings.plate_prefix.clone(),
                settings.effective_plate_match(),
            ),
            consensus: ConsensusBuffer::new(settings.capture_threshold),
            gate: GateStateMachine::new(
                settings.gate_open_secs,
                settings.buzzer_secs,
                settings.side.has_alert(),
            ),
            engine: AccessDecisionEngine::new(&settings),
            settings,
            ledger,
            actuator,
            clock,
            source,
            recognizer,
        }
    }

    pub fn gate(&self) -> &GateStateMachine {
        &self.gate
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn consensus(&self) -> &ConsensusBuffer {
        &self.consensus
    }

    /// 持续运行直到帧来源关闭或出现致命错误；退出前总会执行复位流程。
    pub fn run(&mut self) -> Result<(), ControlError> {
        log::info!(
            "[SYSTEM] {} gate ready at {}",
            self.settings.side,
            self.settings.gate_location
        );
        let result = loop {
            match self.tick() {
                Ok(_) => {}
                Err(ControlError::Capture(CaptureError::Closed)) => {
                    log::info!("[SYSTEM] Frame source closed, shutting down");
                    break Ok(());
                }
                Err(err) => {
                    log::error!("[SYSTEM] Control loop stopped: {}", err);
                    break Err(err);
                }
            }
        };
        self.shutdown();
        result
    }

    /// 执行一个调度周期。
    pub fn tick(&mut self) -> Result<TickReport, ControlError> {
        let frame = self.source.grab()?;
        let mut report = TickReport::default();

        // 测距不阻塞；无读数时按触发区间内的默认值处理
        let reading = match self.actuator.as_mut() {
            Some(link) => link.read_distance()?,
            None => None,
        };
        report.distance_read = reading.is_some();
        report.distance = reading.unwrap_or_else(|| self.settings.fallback_distance());

        // 定时复位每个周期都检查，与是否识别无关
        let now = self.clock.now();
        for action in self.gate.expire(now) {
            let status = self.actuate(action)?;
            report.actions.push((action, status));
        }

        if self.settings.in_range(report.distance) && !self.gate.is_busy() {
            if let Some(frame) = frame.as_ref() {
                report.detection_ran = true;
                self.detect_and_decide(frame, now, &mut report)?;
            }
        }

        if reading.is_none() {
            self.clock
                .sleep(Duration::from_millis(self.settings.idle_tick_ms));
        }
        Ok(report)
    }

    /// 退出流程：闸门/蜂鸣器仍处于活动状态时尽力下发复位。
    pub fn shutdown(&mut self) {
        if self.gate.force_release() {
            match self.actuator.as_mut() {
                Some(link) => {
                    log::info!("[GATE] Releasing gate/alert on shutdown (sent '0')");
                    link.release_best_effort();
                }
                None => log::info!("[GATE] Released on shutdown (no actuator)"),
            }
        }
        self.consensus.clear();
    }

    fn detect_and_decide(
        &mut self,
        frame: &Frame,
        now: NaiveDateTime,
        report: &mut TickReport,
    ) -> Result<(), ControlError> {
        for text in self.recognizer.read_frame(frame) {
            if let Some(plate) = self.validator.extract(&text) {
                log::debug!("candidate {} (raw {:?})", plate, text);
                self.consensus.observe(plate);
            }
            let Some(decided) = self.consensus.decide() else {
                continue;
            };
            let outcome = self.engine.decide(&self.ledger, &decided, now)?;
            self.apply(&outcome, now, report)?;
            report.decisions.push(outcome);
            if self.gate.is_busy() {
                break;
            }
        }
        Ok(())
    }

    fn apply(
        &mut self,
        outcome: &AccessOutcome,
        now: NaiveDateTime,
        report: &mut TickReport,
    ) -> Result<(), ControlError> {
        let action = match outcome.gate_action() {
            GateAction::Open => Some(self.gate.open(now)),
            GateAction::Alert => self.gate.raise_alert(now),
            GateAction::Nothing => None,
        };
        if let Some(action) = action {
            let status = self.actuate(action)?;
            report.actions.push((action, status));
        }
        Ok(())
    }

    /// 下发动作；状态已先行切换，确认结果只用于日志。
    fn actuate(&mut self, action: Actuation) -> Result<AckStatus, ControlError> {
        let Some(link) = self.actuator.as_mut() else {
            log::info!("{} {} (no actuator)", tag(action), describe(action));
            return Ok(AckStatus::NoDevice);
        };
        let status = link.send(action)?;
        match status {
            AckStatus::Confirmed => log::info!(
                "{} {} (sent '{}')",
                tag(action),
                describe(action),
                action.command() as char
            ),
            _ => log::warn!(
                "{} {} unconfirmed (sent '{}')",
                tag(action),
                describe(action),
                action.command() as char
            ),
        }
        Ok(status)
    }
}

fn tag(action: Actuation) -> &'static str {
    match action {
        Actuation::OpenGate | Actuation::CloseGate => "[GATE]",
        Actuation::RaiseAlert | Actuation::ClearAlert => "[ALERT]",
    }
}

fn describe(action: Actuation) -> &'static str {
    match action {
        Actuation::OpenGate => "Opening gate",
        Actuation::CloseGate => "Closing gate",
        Actuation::RaiseAlert => "Buzzer triggered",
        Actuation::ClearAlert => "Buzzer stopped",
    }
}
