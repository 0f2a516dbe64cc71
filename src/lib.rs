// 模块划分：识别输入、车牌校验与投票、串口协议、账本、决策与控制循环
pub mod access;
pub mod actuator;
pub mod anpr;
pub mod clock;
pub mod config;
pub mod consensus;
pub mod cooldown;
pub mod gate;
pub mod ledger;
pub mod model;
pub mod pipeline;
pub mod plate;
pub mod proto;
pub mod serial_io;
