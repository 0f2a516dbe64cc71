/// 多帧投票缓冲：累积合法候选，满阈值后输出多数结果。
#[derive(Clone, Debug)]
pub struct ConsensusBuffer {
    threshold: usize,
    votes: Vec<String>,
}

impl ConsensusBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            votes: Vec::with_capacity(threshold.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.votes.len() >= self.threshold
    }

    /// 追加一票。
    pub fn observe(&mut self, candidate: impl Into<String>) {
        self.votes.push(candidate.into());
    }

    /// 达到阈值时输出票数最多的车牌（平票取最早出现者），并清空缓冲。
    pub fn decide(&mut self) -> Option<String> {
        if !self.is_ready() {
            return None;
        }
        let votes = std::mem::take(&mut self.votes);
        // 按首次出现顺序统计
        let mut tally: Vec<(&str, usize)> = Vec::new();
        for vote in &votes {
            match tally.iter_mut().find(|(value, _)| *value == vote.as_str()) {
                Some((_, count)) => *count += 1,
                None => tally.push((vote.as_str(), 1)),
            }
        }
        let mut best: Option<(&str, usize)> = None;
        for (value, count) in tally {
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((value, count));
            }
        }
        best.map(|(value, _)| value.to_string())
    }

    pub fn clear(&mut self) {
        self.votes.clear();
    }
}
