//! CREATE3 初始 Keccak 状态
//!
//! 内核从一个预先填好的 200 字节 Keccak 状态开始，每个候选只需要改写 salt 部分。
//! 状态以 `ERADICATE2_INITHASH` 宏的形式传给编译器。

use byteorder::{ByteOrder, LittleEndian};
use rand::RngCore;
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};

/// CREATE3 代理合约字节码哈希
pub const DEFAULT_C3_PROXY_HASH: &str =
    "21c35dbe1b344a2488cf3321d6ce542f8e9f305544ff09e4993a62319a497c1f";

/// CREATE3 工厂合约地址
pub const DEFAULT_C3_DEPLOYER: &str = "00000000000029398fcE86f09FF8453c8D0Cd60D";

/// Keccak-f[1600] 状态大小 (字节)
pub const STATE_LEN: usize = 200;

/// 随机填充的 salt 前缀长度
pub const RANDOM_LEN: usize = 16;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// 解析十六进制字符串 (可带 0x 前缀)
pub fn parse_hex_bytes(s: &str) -> anyhow::Result<Vec<u8>> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    hex::decode(s).map_err(|e| anyhow::anyhow!("invalid hex string '{}': {}", s, e))
}

fn parse_fixed<const N: usize>(s: &str, what: &str) -> anyhow::Result<[u8; N]> {
    let bytes = parse_hex_bytes(s)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("{} must be {} bytes, got {}", what, N, bytes.len()))
}

/// 构造初始状态
///
/// 布局: `0xff` | CREATE3 工厂地址 (20) | 随机数 (16) | keccak(deployer) 地址的后 16 字节 |
/// 代理字节码哈希 (32)，最后对第 85 字节异或 0x01 (Keccak 填充)。
pub fn init_hash_state(
    c3_deployer: &[u8; 20],
    deployer: &[u8],
    proxy_hash: &[u8; 32],
    random: &[u8; RANDOM_LEN],
) -> [u8; STATE_LEN] {
    let deployer_hash = keccak256(deployer);
    let deployer_addr = &deployer_hash[12..];

    let mut state = [0u8; STATE_LEN];
    state[0] = 0xff;
    state[1..21].copy_from_slice(c3_deployer);
    state[21..37].copy_from_slice(random);
    state[37..53].copy_from_slice(&deployer_addr[4..20]);
    state[53..85].copy_from_slice(proxy_hash);
    state[85] ^= 0x01;
    state
}

/// 将状态渲染为 25 个小端 u64: `0x..,0x..,...`
pub fn init_hash_expression(state: &[u8; STATE_LEN]) -> String {
    state
        .chunks_exact(8)
        .map(|lane| format!("0x{:x}", LittleEndian::read_u64(lane)))
        .collect::<Vec<_>>()
        .join(",")
}

/// 由命令行参数构造 `ERADICATE2_INITHASH` 表达式
pub fn build_init_hash(deployer: &str, c3_deployer: &str, c3_proxy_hash: &str) -> anyhow::Result<String> {
    let deployer = parse_hex_bytes(deployer)?;
    let c3_deployer: [u8; 20] = parse_fixed(c3_deployer, "c3 deployer")?;
    let proxy_hash: [u8; 32] = parse_fixed(c3_proxy_hash, "c3 proxy hash")?;

    let mut random = [0u8; RANDOM_LEN];
    OsRng.fill_bytes(&mut random);

    let state = init_hash_state(&c3_deployer, &deployer, &proxy_hash, &random);
    Ok(init_hash_expression(&state))
}
