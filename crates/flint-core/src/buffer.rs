//! 字节缓冲契约：以“切片链”形式暴露存储，支持预留、提交与从头部排空。

/// 缓冲内一段连续内存的句柄。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - TLS 状态机需要把解密后的明文直接写进读缓冲，避免先落到临时数组再复制；
/// - Rust 借用规则不允许同时持有多段 `&mut [u8]` 与缓冲本身的可变引用，因此以“句柄 + 按需借用”
///   的方式表达预留区域：句柄只记录位置，真正的可写切片通过 [`Buffer::slice_mut`] 临时借出。
///
/// ## 契约（What）
/// - `slab` 为实现方定义的分片标识，调用方不得自行构造或修改；
/// - `len` 可通过 [`RawSlice::truncate`] 缩短，用于声明实际写入的字节数；
/// - 长度为 0 的句柄在 [`Buffer::commit`] 时会被忽略，防止暴露未写入的内存。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawSlice {
    slab: u64,
    offset: usize,
    len: usize,
}

impl RawSlice {
    /// 供缓冲实现构造句柄。
    pub const fn new(slab: u64, offset: usize, len: usize) -> Self {
        Self { slab, offset, len }
    }

    /// 分片标识。
    pub const fn slab(&self) -> u64 {
        self.slab
    }

    /// 区域在分片内的起始偏移。
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// 区域长度。
    pub const fn len(&self) -> usize {
        self.len
    }

    /// 区域是否为空。
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 缩短区域，只保留前 `len` 字节；大于当前长度时保持不变。
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }
}

/// `Buffer` 描述连接读写两侧共用的可增长字节缓冲。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 借鉴 Envoy `Buffer::Instance` 与 `bytes::BufMut` 的写入语义：读路径“预留 → 写入 → 提交”，
///   写路径“枚举切片 → 写出 → 从头排空”；
/// - TLS 状态机只依赖该契约，不关心底层是切片链、池化内存还是连续数组。
///
/// ## 逻辑（How）
/// - [`reserve`](Self::reserve) 最多返回 `slices.len()` 段区域，优先使用尾部分片剩余空间；
/// - [`commit`](Self::commit) 只把非空区域计入可读长度；
/// - [`raw_slices`](Self::raw_slices) 只读地返回当前数据切片，顺序即字节顺序；
/// - [`drain`](Self::drain) 从头部丢弃字节。
///
/// ## 契约（What）
/// - **前置条件**：`reserve` 与对应 `commit` 之间不得调用 `drain`/`add`；
/// - **后置条件**：`commit` 后 `length()` 增加的字节数等于所有非空区域长度之和；
///   `drain(n)` 后 `length()` 减少 `min(n, length())`；
/// - 字节只会追加到尾部，因此一段未写完的切片在下一次枚举时从相同偏移、以相同内容出现。
///
/// ## 风险与权衡（Trade-offs）
/// - 区域句柄在 `drain` 之后可能失效，实现需要在 `commit` 时容忍并忽略失效句柄；
/// - `raw_slices` 返回 `Vec` 会产生一次小分配，换取对象安全与调用端的简洁。
pub trait Buffer: Send {
    /// 当前可读字节数。
    fn length(&self) -> usize;

    /// 把 `data` 复制追加到尾部。
    fn add(&mut self, data: &[u8]);

    /// 预留至多 `max_length` 字节的可写空间，填充到 `slices` 中并返回实际使用的段数。
    fn reserve(&mut self, max_length: usize, slices: &mut [RawSlice]) -> usize;

    /// 借出预留区域对应的可写切片；句柄失效时返回空切片。
    fn slice_mut(&mut self, slice: &RawSlice) -> &mut [u8];

    /// 提交写入完成的区域，空区域被忽略。
    fn commit(&mut self, slices: &[RawSlice]);

    /// 当前数据切片（只读，不改变缓冲）。
    fn raw_slices(&self) -> Vec<&[u8]>;

    /// 从头部丢弃 `size` 字节。
    fn drain(&mut self, size: usize);

    /// 是否没有可读数据。
    fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// 复制出全部可读数据，主要用于过滤器与测试。
    fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length());
        for slice in self.raw_slices() {
            out.extend_from_slice(slice);
        }
        out
    }
}
