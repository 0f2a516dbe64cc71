use std::fs;

/// 可在编译期固化的默认值（账本路径、控制板串口）。
const BAKED_KEYS: [&str; 2] = ["PARKING_DB_FILE", "PARKING_SERIAL_PORT"];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    for key in BAKED_KEYS {
        println!("cargo:rerun-if-env-changed={}", key);
    }

    // 构建环境中的变量优先于 .env
    let mut baked: Vec<(String, String)> = BAKED_KEYS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect();

    if let Ok(contents) = fs::read_to_string(".env") {
        for (key, value) in contents.lines().filter_map(parse_line) {
            if BAKED_KEYS.contains(&key.as_str()) && !baked.iter().any(|(k, _)| *k == key) {
                baked.push((key, value));
            }
        }
    }

    for (key, value) in baked {
        println!("cargo:rustc-env={}={}", key, value);
    }
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let value = value.trim();
    let value = ['"', '\'']
        .iter()
        .find_map(|quote| {
            value
                .strip_prefix(*quote)
                .and_then(|rest| rest.strip_suffix(*quote))
        })
        .unwrap_or(value);
    Some((key.trim().to_string(), value.to_string()))
}
