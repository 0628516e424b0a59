//! `chain_buffer_contract` 集成测试：校验 `ChainBuffer` 对 `reserve → commit → drain` 契约的实现。
//!
//! # 测试总览（Why）
//! - TLS 状态机依赖“空区域不提交”“部分写出后从同一偏移重试”等性质，这里逐条固化；
//! - 以 `VecDeque<u8>` 作为参照模型，用 proptest 校验任意 `add`/`drain` 序列下字节顺序不变。

use std::collections::VecDeque;

use flint_buffer::ChainBuffer;
use flint_core::{Buffer, RawSlice};
use proptest::prelude::*;

fn fill(buffer: &mut ChainBuffer, slice: &RawSlice, byte: u8) {
    buffer.slice_mut(slice).fill(byte);
}

/// 预留先用尾片剩余空间，再补一个新分片，两段合计恰为请求长度。
#[test]
fn reserve_spans_tail_space_and_a_fresh_slab() {
    let mut buffer = ChainBuffer::with_slab_size(8);
    buffer.add(b"abcde");
    let mut slices = [RawSlice::default(); 2];
    let used = buffer.reserve(10, &mut slices);
    assert_eq!(used, 2);
    assert_eq!(slices[0].len(), 3, "尾片剩余 3 字节");
    assert_eq!(slices[0].offset(), 5);
    assert_eq!(slices[1].len(), 7);
    assert_eq!(slices[1].offset(), 0);

    fill(&mut buffer, &slices[0], b'x');
    fill(&mut buffer, &slices[1], b'y');
    buffer.commit(&slices);
    assert_eq!(buffer.length(), 15);
    assert_eq!(buffer.to_vec(), b"abcdexxxyyyyyyy".to_vec());
}

/// 只提交收到数据的区域：空区域不计入长度，也不出现在切片中。
#[test]
fn empty_regions_are_never_committed() {
    let mut buffer = ChainBuffer::with_slab_size(4);
    let mut slices = [RawSlice::default(); 2];
    let used = buffer.reserve(16, &mut slices);
    assert_eq!(used, 1, "空链只需一个新分片");
    slices[0].truncate(0);
    buffer.commit(&slices[..used]);
    assert_eq!(buffer.length(), 0);
    assert!(buffer.raw_slices().is_empty());
}

/// 缩短后的区域只提交实际写入的前缀。
#[test]
fn truncated_region_commits_only_the_written_prefix() {
    let mut buffer = ChainBuffer::new();
    let mut slices = [RawSlice::default(); 2];
    let used = buffer.reserve(16 * 1024, &mut slices);
    buffer.slice_mut(&slices[0])[..5].copy_from_slice(b"hello");
    slices[0].truncate(5);
    buffer.commit(&slices[..used]);
    assert_eq!(buffer.to_vec(), b"hello".to_vec());

    // 再次预留从已提交末尾继续。
    let used = buffer.reserve(3, &mut slices);
    assert_eq!(used, 1);
    assert_eq!(slices[0].offset(), 5);
    fill(&mut buffer, &slices[0], b'!');
    buffer.commit(&slices[..used]);
    assert_eq!(buffer.to_vec(), b"hello!!!".to_vec());
}

/// 反复“少量填充 + 空区域交还”不会让链上堆积空分片。
#[test]
fn repeated_small_fills_keep_the_chain_short() {
    let mut buffer = ChainBuffer::new();
    let mut slices = [RawSlice::default(); 2];
    for round in 0..50u8 {
        let used = buffer.reserve(16 * 1024, &mut slices);
        fill(&mut buffer, &slices[0], round);
        slices[0].truncate(10);
        for slice in &mut slices[1..used] {
            slice.truncate(0);
        }
        buffer.commit(&slices[..used]);
        assert_eq!(buffer.slab_count(), 1, "第 {round} 轮后只应剩一个分片");
    }
    assert_eq!(buffer.length(), 500);
    assert_eq!(buffer.raw_slices().len(), 1);
}

/// 部分排空后剩余字节以相同内容出现在下一次枚举的首个切片中。
#[test]
fn partial_drain_keeps_the_unwritten_tail_in_place() {
    let mut buffer = ChainBuffer::with_slab_size(64);
    let payload: Vec<u8> = (0..100u8).collect();
    buffer.add(&payload);
    let before: Vec<Vec<u8>> = buffer.raw_slices().into_iter().map(<[u8]>::to_vec).collect();
    assert_eq!(before.len(), 1, "单次 add 会分配足够大的分片");

    buffer.drain(40);
    assert_eq!(buffer.length(), 60);
    let after = buffer.raw_slices();
    assert_eq!(after[0], &payload[40..]);
}

/// 排空跨越多个分片时，耗尽的头部分片被移除。
#[test]
fn drain_across_slabs_releases_exhausted_slabs() {
    let mut buffer = ChainBuffer::with_slab_size(4);
    buffer.add(b"abcd");
    buffer.add(b"efgh");
    buffer.add(b"ij");
    assert_eq!(buffer.slab_count(), 3);
    buffer.drain(6);
    assert_eq!(buffer.to_vec(), b"ghij".to_vec());
    assert_eq!(buffer.slab_count(), 2);
    buffer.drain(100);
    assert!(buffer.is_empty());
    assert_eq!(buffer.slab_count(), 1, "尾片保留以复用剩余空间");
}

/// 偏移与已提交长度不一致的陈旧句柄被忽略。
#[test]
fn stale_handles_are_ignored_on_commit() {
    let mut buffer = ChainBuffer::with_slab_size(8);
    let mut slices = [RawSlice::default(); 1];
    buffer.reserve(4, &mut slices);
    fill(&mut buffer, &slices[0], b'a');
    buffer.commit(&slices);
    buffer.commit(&slices);
    assert_eq!(buffer.to_vec(), b"aaaa".to_vec());

    let bogus = RawSlice::new(99, 0, 4);
    assert!(buffer.slice_mut(&bogus).is_empty());
    buffer.commit(&[bogus]);
    assert_eq!(buffer.length(), 4);
}

#[derive(Clone, Debug)]
enum Op {
    Add(Vec<u8>),
    Drain(usize),
    Reserve { len: usize, commit: usize, byte: u8 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..40).prop_map(Op::Add),
        (0usize..50).prop_map(Op::Drain),
        (1usize..40, 0usize..40, any::<u8>())
            .prop_map(|(len, commit, byte)| Op::Reserve { len, commit, byte }),
    ]
}

proptest! {
    /// 任意操作序列下，缓冲内容与参照模型逐字节一致。
    #[test]
    fn chain_matches_a_flat_model(ops in proptest::collection::vec(op(), 0..64)) {
        let mut buffer = ChainBuffer::with_slab_size(16);
        let mut model: VecDeque<u8> = VecDeque::new();
        for op in ops {
            match op {
                Op::Add(data) => {
                    buffer.add(&data);
                    model.extend(data);
                }
                Op::Drain(n) => {
                    buffer.drain(n);
                    let n = n.min(model.len());
                    model.drain(..n);
                }
                Op::Reserve { len, commit, byte } => {
                    let mut slices = [RawSlice::default(); 2];
                    let used = buffer.reserve(len, &mut slices);
                    // 模拟引擎：按顺序写满区域，部分写入后停止。
                    let mut budget = commit.min(len);
                    let mut stopped = false;
                    for slice in slices[..used].iter_mut() {
                        let n = if stopped { 0 } else { slice.len().min(budget) };
                        if n > 0 {
                            buffer.slice_mut(slice)[..n].fill(byte);
                        }
                        stopped |= n < slice.len();
                        slice.truncate(n);
                        budget -= n;
                        model.extend(std::iter::repeat_n(byte, n));
                    }
                    buffer.commit(&slices[..used]);
                }
            }
            prop_assert_eq!(buffer.length(), model.len());
            prop_assert_eq!(buffer.to_vec(), model.iter().copied().collect::<Vec<u8>>());
        }
    }
}
