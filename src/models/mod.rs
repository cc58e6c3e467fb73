// 数据模型模块

pub mod known_hosts;
pub mod profile;
pub mod settings;

pub use known_hosts::{HostIdentity, KnownHost};
pub use profile::{AuthMethod, ProfileError, ServerProfile};
pub use settings::{AppSettings, ConnectionSettings, TerminalSettings};
