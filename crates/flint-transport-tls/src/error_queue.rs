use std::collections::VecDeque;

use crate::engine::EngineError;

/// 会话私有的错误队列。
///
/// # 意图（Why）
/// - 每个会话只累计自己的失败记录，排空时不会读到其它连接的错误；
/// - 先进先出，保持与错误发生顺序一致的日志。
///
/// # 契约（What）
/// - 队列长度上限为 [`ErrorQueue::CAPACITY`]，溢出时丢弃最旧记录；
/// - [`pop`](Self::pop) 返回 `None` 即表示已排空。
#[derive(Clone, Debug, Default)]
pub struct ErrorQueue {
    entries: VecDeque<EngineError>,
}

impl ErrorQueue {
    /// 单个会话最多保留的记录数。
    pub const CAPACITY: usize = 32;

    /// 追加一条记录。
    pub fn push(&mut self, entry: EngineError) {
        if self.entries.len() == Self::CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// 弹出最早的记录。
    pub fn pop(&mut self) -> Option<EngineError> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
