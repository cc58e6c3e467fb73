// Terminal 模块 - 终端输入字节序列（渲染由外部终端组件负责）

pub mod keys;

pub use keys::{alt_sequence, control_byte, SpecialKey};
