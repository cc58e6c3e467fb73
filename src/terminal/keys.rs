// 键盘映射 - 将扩展按键转换为终端转义序列

/// 扩展按键（软键盘上的附加按键）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialKey {
    Escape,
    Tab,
    Enter,
    Backspace,
    Up,
    Down,
    Right,
    Left,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    /// F1 - F12
    F(u8),
}

impl SpecialKey {
    /// 按键名解析（"up"、"pagedown"、"f5" 等）
    pub fn from_name(name: &str) -> Option<Self> {
        let key = match name.to_lowercase().as_str() {
            "escape" | "esc" => Self::Escape,
            "tab" => Self::Tab,
            "enter" | "return" => Self::Enter,
            "backspace" => Self::Backspace,
            "up" => Self::Up,
            "down" => Self::Down,
            "right" => Self::Right,
            "left" => Self::Left,
            "home" => Self::Home,
            "end" => Self::End,
            "pageup" => Self::PageUp,
            "pagedown" => Self::PageDown,
            "insert" => Self::Insert,
            "delete" => Self::Delete,
            other => {
                let n: u8 = other.strip_prefix('f')?.parse().ok()?;
                if !(1..=12).contains(&n) {
                    return None;
                }
                Self::F(n)
            }
        };
        Some(key)
    }

    /// 转义序列
    pub fn sequence(&self) -> Option<&'static [u8]> {
        let bytes: &'static [u8] = match self {
            Self::Escape => b"\x1b",
            Self::Tab => b"\t",
            Self::Enter => b"\r", // CR
            Self::Backspace => b"\x7f", // DEL
            Self::Up => b"\x1b[A",
            Self::Down => b"\x1b[B",
            Self::Right => b"\x1b[C",
            Self::Left => b"\x1b[D",
            Self::Home => b"\x1b[H",
            Self::End => b"\x1b[F",
            Self::PageUp => b"\x1b[5~",
            Self::PageDown => b"\x1b[6~",
            Self::Insert => b"\x1b[2~",
            Self::Delete => b"\x1b[3~",
            Self::F(1) => b"\x1bOP",
            Self::F(2) => b"\x1bOQ",
            Self::F(3) => b"\x1bOR",
            Self::F(4) => b"\x1bOS",
            Self::F(5) => b"\x1b[15~",
            Self::F(6) => b"\x1b[17~",
            Self::F(7) => b"\x1b[18~",
            Self::F(8) => b"\x1b[19~",
            Self::F(9) => b"\x1b[20~",
            Self::F(10) => b"\x1b[21~",
            Self::F(11) => b"\x1b[23~",
            Self::F(12) => b"\x1b[24~",
            Self::F(_) => return None,
        };
        Some(bytes)
    }
}

/// Ctrl + 键
///
/// `a`-`z`（不区分大小写）以及 `@[\]^_`。
pub fn control_byte(key: char) -> Option<u8> {
    match key.to_ascii_uppercase() {
        c @ '@'..='_' => Some(c as u8 - 0x40),
        '?' => Some(0x7f),
        _ => None,
    }
}

/// Alt + 键 (发送 ESC 前缀)
pub fn alt_sequence(key: char) -> Vec<u8> {
    let mut bytes = vec![0x1b];
    let mut buf = [0u8; 4];
    bytes.extend_from_slice(key.encode_utf8(&mut buf).as_bytes());
    bytes
}
