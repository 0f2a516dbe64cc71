use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use parking_gate::actuator::{self, ActuatorLink};
use parking_gate::anpr::{LineFeed, Recognizer, TextOcr, WholeFrame};
use parking_gate::clock::{Clock, SystemClock};
use parking_gate::config::load_settings;
use parking_gate::ledger::{LedgerStore, ReportQueries};
use parking_gate::model::{GateSettings, GateSide};
use parking_gate::pipeline::ControlLoop;
use parking_gate::serial_io::SimulatedController;

#[derive(Parser)]
#[command(name = "parking-gate", version, about = "Parking entry/exit gate controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 运行一个闸机控制循环（识别文本从 stdin 逐行读入）
    Run {
        #[arg(long, value_enum)]
        side: SideArg,
        /// JSON 参数文件
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, env = "PARKING_DB")]
        db: Option<String>,
        /// 控制板串口（不指定则自动探测）
        #[arg(long)]
        port: Option<String>,
        /// 使用内置控制板模拟器代替真实串口
        #[arg(long)]
        simulate: bool,
    },
    /// 创建账本表结构
    InitDb {
        #[arg(long, env = "PARKING_DB")]
        db: Option<String>,
    },
    /// 只读报表（JSON 输出）
    Report {
        #[arg(value_enum)]
        kind: ReportKind,
        #[arg(long, env = "PARKING_DB")]
        db: Option<String>,
    },
    /// 列出串口设备
    Ports,
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Entry,
    Exit,
}

impl From<SideArg> for GateSide {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Entry => GateSide::Entry,
            SideArg::Exit => GateSide::Exit,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportKind {
    Active,
    Exits,
    Payments,
    Violations,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            side,
            config,
            db,
            port,
            simulate,
        } => {
            let mut settings = load_settings(side.into(), config.as_deref())
                .context("failed to load gate settings")?;
            if let Some(db) = db {
                settings.db_file = db;
            }
            if port.is_some() {
                settings.serial_port = port;
            }
            run_gate(settings, simulate)
        }
        Command::InitDb { db } => {
            let db = db.unwrap_or_else(default_db_file);
            LedgerStore::open(&db).with_context(|| format!("failed to open ledger {db}"))?;
            log::info!("[SYSTEM] Ledger ready at {}", db);
            Ok(())
        }
        Command::Report { kind, db } => {
            let db = db.unwrap_or_else(default_db_file);
            let reports = ReportQueries::open(&db)
                .with_context(|| format!("failed to open ledger {db} read-only"))?;
            let json = match kind {
                ReportKind::Active => serde_json::to_string_pretty(&reports.active_entries()?)?,
                ReportKind::Exits => serde_json::to_string_pretty(&reports.settled_exits()?)?,
                ReportKind::Payments => serde_json::to_string_pretty(&reports.paid_records()?)?,
                ReportKind::Violations => serde_json::to_string_pretty(&reports.violations()?)?,
            };
            println!("{json}");
            Ok(())
        }
        Command::Ports => {
            let devices = actuator::list_devices().context("failed to enumerate serial ports")?;
            let chosen = actuator::select_device(
                std::env::consts::OS,
                devices.iter().map(String::as_str),
            );
            for device in &devices {
                let marker = if chosen.as_deref() == Some(device.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {device}");
            }
            Ok(())
        }
    }
}

fn default_db_file() -> String {
    GateSettings::default().db_file
}

fn run_gate(settings: GateSettings, simulate: bool) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = LedgerStore::open(&settings.db_file)
        .with_context(|| format!("failed to open ledger {}", settings.db_file))?;

    let actuator = if simulate {
        log::info!("[CONNECTED] Simulated controller");
        Some(ActuatorLink::new(
            Box::new(SimulatedController::new()),
            clock.clone(),
        ))
    } else {
        connect_actuator(&settings, clock.clone())
    };

    // 外部识别进程把 OCR 结果逐行写入 stdin
    let source = LineFeed::spawn(BufReader::new(io::stdin()));
    let recognizer = Recognizer::new(WholeFrame, TextOcr);
    let mut control = ControlLoop::new(settings, ledger, actuator, clock, source, recognizer);
    control.run()?;
    Ok(())
}

/// 探测并打开控制板；失败时退化为仅识别与记账模式。
fn connect_actuator(settings: &GateSettings, clock: Arc<dyn Clock>) -> Option<ActuatorLink> {
    let path = match settings.serial_port.clone() {
        Some(path) => Some(path),
        None => match actuator::discover_device() {
            Ok(found) => found,
            Err(err) => {
                log::warn!("Serial enumeration failed: {}", err);
                None
            }
        },
    };
    let Some(path) = path else {
        log::error!("[ERROR] Actuator not detected.");
        return None;
    };
    let port = match actuator::open_serial(&path, settings.baud_rate) {
        Ok(port) => port,
        Err(err) => {
            log::error!("[ERROR] Cannot open actuator on {}: {}", path, err);
            return None;
        }
    };
    log::info!("[CONNECTED] Actuator on {}", path);
    let mut link = ActuatorLink::new(port, clock);
    if let Err(err) = link.settle() {
        log::warn!("Actuator settle failed: {}", err);
    }
    Some(link)
}
