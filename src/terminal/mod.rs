pub mod clipboard;
pub mod driver;
pub mod intent;
pub mod port;
pub mod process;

pub use clipboard::ClipboardTransfer;
pub use driver::{DriverConfig, TerminalDriver};
pub use intent::{CourseRequest, MenuTarget, OperationIntent, OperationOutput, Semester};
pub use port::{ClipboardPort, Key, TerminalPort, TerminalProcess};
pub use process::{ProcessConfig, SysinfoProcess};
