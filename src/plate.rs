use crate::model::PlateMatch;

/// 车牌固定长度：3 位字母 + 3 位数字 + 1 位校验字母。
pub const PLATE_LEN: usize = 7;

/// 车牌格式校验器（按闸机配置的前缀与匹配方式）。
#[derive(Clone, Debug)]
pub struct PlateValidator {
    prefix: String,
    strategy: PlateMatch,
}

impl PlateValidator {
    pub fn new(prefix: impl Into<String>, strategy: PlateMatch) -> Self {
        Self {
            prefix: prefix.into(),
            strategy,
        }
    }

    /// 从 OCR 原始文本中提取合法车牌；不合法时返回 None（静默丢弃）。
    pub fn extract(&self, raw: &str) -> Option<String> {
        let text = normalize(raw);
        let start = match self.strategy {
            PlateMatch::Prefix => {
                if !text.starts_with(self.prefix.as_str()) {
                    return None;
                }
                0
            }
            PlateMatch::Scan => text.find(self.prefix.as_str())?,
        };
        let candidate: String = text[start..].chars().take(PLATE_LEN).collect();
        is_well_formed(&candidate).then_some(candidate)
    }
}

/// 7 位车牌格式：0-2 字母，3-5 数字，6 字母。
pub fn is_well_formed(plate: &str) -> bool {
    let chars: Vec<char> = plate.chars().collect();
    if chars.len() != PLATE_LEN {
        return false;
    }
    chars[0..3].iter().all(|c| c.is_ascii_alphabetic())
        && chars[3..6].iter().all(|c| c.is_ascii_digit())
        && chars[6].is_ascii_alphabetic()
}

/// OCR 文本统一为大写并去除空白。
fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}
