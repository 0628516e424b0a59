use std::{collections::VecDeque, fmt};

use bytes::{Buf, BytesMut};
use flint_core::{Buffer, RawSlice};

/// 新分片的默认容量，与 TLS 单条记录的最大明文长度一致。
pub const DEFAULT_SLAB_SIZE: usize = 16 * 1024;

/// 链上的单个分片。
///
/// - `bytes` 在创建时即清零到完整容量，`reserve` 借出的区域因此永远是已初始化内存；
/// - `filled` 为已提交字节数，`bytes[..filled]` 可读，`bytes[filled..]` 为剩余可写空间；
/// - 排空通过 `Buf::advance` 推进 `bytes` 头部，`filled` 同步减少。
struct Slab {
    id: u64,
    bytes: BytesMut,
    filled: usize,
}

impl Slab {
    fn new(id: u64, capacity: usize) -> Self {
        Self {
            id,
            bytes: BytesMut::zeroed(capacity),
            filled: 0,
        }
    }

    fn spare(&self) -> usize {
        self.bytes.len() - self.filled
    }

    fn readable(&self) -> &[u8] {
        &self.bytes[..self.filled]
    }
}

/// `ChainBuffer` 以分片链承载字节，实现 [`Buffer`] 的三段式契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 读路径希望 TLS 引擎把明文直接解密进缓冲尾部；写路径希望按分片逐段交给引擎，
///   已写出的前缀从头部排空，未写完的部分保持原位等待重试；
/// - 分片一经分配便不搬移，未写完的切片在下一次 [`Buffer::raw_slices`] 中以相同偏移与内容出现。
///
/// ## 逻辑（How）
/// - `reserve`：先借出尾分片的剩余空间，不足部分新建一个容量为 `max(slab_size, 剩余请求)` 的分片；
/// - `commit`：按分片标识定位，只有起始偏移恰好等于分片已提交长度的区域才会被接受，
///   失效句柄与空句柄被忽略；提交后回收链尾未收到任何字节的分片，下一次预留重新从前一分片的剩余空间开始；
/// - `drain`：从头部推进，整片耗尽且不是尾分片时从链上移除。
///
/// ## 契约（What）
/// - 分片标识单调递增、永不复用，因此被移除分片的旧句柄不会误命中新分片；
/// - 预留但未提交的空分片不会出现在 `raw_slices` 中。
///
/// ## 风险与权衡（Trade-offs）
/// - 链尾空分片在每次提交时释放，反复的小块读取至多多占用一个分片；
///   代价是下一次预留可能重新分配同样大小的分片。
pub struct ChainBuffer {
    slabs: VecDeque<Slab>,
    length: usize,
    slab_size: usize,
    next_id: u64,
}

impl ChainBuffer {
    /// 使用默认分片容量创建空缓冲。
    pub fn new() -> Self {
        Self::with_slab_size(DEFAULT_SLAB_SIZE)
    }

    /// 指定新分片的最小容量；传入 0 时按 1 处理。
    pub fn with_slab_size(slab_size: usize) -> Self {
        Self {
            slabs: VecDeque::new(),
            length: 0,
            slab_size: slab_size.max(1),
            next_id: 0,
        }
    }

    /// 链上分片数（含已预留但尚未提交的空分片）。
    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    fn push_slab(&mut self, min_capacity: usize) -> &mut Slab {
        let id = self.next_id;
        self.next_id += 1;
        self.slabs
            .push_back(Slab::new(id, self.slab_size.max(min_capacity)));
        // 刚 push 过，尾部必然存在。
        let last = self.slabs.len() - 1;
        &mut self.slabs[last]
    }

    /// 回收链尾空分片；只剩一个分片时保留，供下一次预留复用。
    fn release_empty_tail(&mut self) {
        while self.slabs.len() > 1 && self.slabs.back().is_some_and(|slab| slab.filled == 0) {
            self.slabs.pop_back();
        }
    }

    fn slab_mut(&mut self, id: u64) -> Option<&mut Slab> {
        self.slabs.iter_mut().find(|slab| slab.id == id)
    }
}

impl Default for ChainBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChainBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainBuffer")
            .field("length", &self.length)
            .field("slabs", &self.slabs.len())
            .field("slab_size", &self.slab_size)
            .finish()
    }
}

impl Buffer for ChainBuffer {
    fn length(&self) -> usize {
        self.length
    }

    fn add(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let needs_slab = self.slabs.back().is_none_or(|slab| slab.spare() == 0);
            let slab = if needs_slab {
                self.push_slab(data.len())
            } else {
                let last = self.slabs.len() - 1;
                &mut self.slabs[last]
            };
            let take = slab.spare().min(data.len());
            let start = slab.filled;
            slab.bytes[start..start + take].copy_from_slice(&data[..take]);
            slab.filled += take;
            self.length += take;
            data = &data[take..];
        }
    }

    fn reserve(&mut self, max_length: usize, slices: &mut [RawSlice]) -> usize {
        if max_length == 0 || slices.is_empty() {
            return 0;
        }
        let mut remaining = max_length;
        let mut used = 0;
        if let Some(tail) = self.slabs.back() {
            let spare = tail.spare();
            if spare > 0 {
                let len = spare.min(remaining);
                slices[used] = RawSlice::new(tail.id, tail.filled, len);
                used += 1;
                remaining -= len;
            }
        }
        if remaining > 0 && used < slices.len() {
            let slab = self.push_slab(remaining);
            slices[used] = RawSlice::new(slab.id, 0, remaining);
            used += 1;
        }
        used
    }

    fn slice_mut(&mut self, slice: &RawSlice) -> &mut [u8] {
        let Some(slab) = self.slab_mut(slice.slab()) else {
            return Default::default();
        };
        let end = slice.offset().saturating_add(slice.len());
        if end > slab.bytes.len() {
            return Default::default();
        }
        &mut slab.bytes[slice.offset()..end]
    }

    fn commit(&mut self, slices: &[RawSlice]) {
        for slice in slices.iter().filter(|slice| !slice.is_empty()) {
            let Some(slab) = self.slab_mut(slice.slab()) else {
                continue;
            };
            if slice.offset() != slab.filled || slice.len() > slab.spare() {
                continue;
            }
            slab.filled += slice.len();
            self.length += slice.len();
        }
        self.release_empty_tail();
    }

    fn raw_slices(&self) -> Vec<&[u8]> {
        self.slabs
            .iter()
            .filter(|slab| slab.filled > 0)
            .map(Slab::readable)
            .collect()
    }

    fn drain(&mut self, size: usize) {
        let mut remaining = size.min(self.length);
        self.length -= remaining;
        while let Some(front) = self.slabs.front_mut() {
            let take = front.filled.min(remaining);
            front.bytes.advance(take);
            front.filled -= take;
            remaining -= take;
            // 尾片保留剩余空间供下一次预留；其余耗尽的分片直接出链。
            if front.filled > 0 || self.slabs.len() == 1 {
                break;
            }
            self.slabs.pop_front();
        }
    }
}
