//! `flint-buffer` 提供 `flint-core::buffer::Buffer` 契约的具体实现。
//!
//! # 模块定位（Why）
//! - `flint-core` 只定义 `reserve → commit → drain` 契约，TLS 状态机与测试都需要一个可直接使用的实体；
//! - 以固定容量分片（slab）串成链，读路径可直接把解密结果写进分片尾部，写路径可按分片逐段交给引擎。
//!
//! # 设计概要（How）
//! - `chain` 模块实现 [`ChainBuffer`]，每个分片由一块预先清零的 `bytes::BytesMut` 承载；
//! - 排空时借助 `Buf::advance` 推进分片头部，整片耗尽后从链上移除。

mod chain;

pub use chain::{ChainBuffer, DEFAULT_SLAB_SIZE};
